// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Archive routing: personal folders and department team folders.
//!
//! Layout under the archive root:
//! - `<root>/<personal folder>/<file>`: the recording is *moved* here
//! - `<root>/team/<department>/<file>`: the recording is *copied* here
//!
//! Personal folders are found by, in order: the manual mapping table, the
//! filesystem owner of each top-level folder (optional capability), and a
//! case-insensitive folder-name match. Names are compared both raw and
//! transliterated to pinyin.

use crate::db::FolderMapping;
use crate::services::feishu::FeishuClient;
use pinyin::ToPinyin;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory under the archive root that holds department folders.
pub const TEAM_DIR: &str = "team";

/// Resolves the account name owning a directory.
pub trait OwnerLookup: Send + Sync {
    fn owner_name(&self, path: &Path) -> Option<String>;
}

/// Owner lookup through the host user database.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOwners;

#[cfg(unix)]
impl OwnerLookup for SystemOwners {
    fn owner_name(&self, path: &Path) -> Option<String> {
        use std::os::unix::fs::MetadataExt;

        let uid = std::fs::metadata(path).ok()?.uid();
        match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
            Ok(Some(user)) => Some(user.name),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(uid, error = %e, "Owner lookup failed");
                None
            }
        }
    }
}

/// Routes downloaded recordings into the archive tree.
#[derive(Clone)]
pub struct ArchivalRouter {
    client: FeishuClient,
    archive_root: PathBuf,
    mapping: FolderMapping,
    owners: Option<Arc<dyn OwnerLookup>>,
    sentinel_department: Option<String>,
}

impl ArchivalRouter {
    pub fn new(
        client: FeishuClient,
        archive_root: PathBuf,
        mapping: FolderMapping,
        owners: Option<Arc<dyn OwnerLookup>>,
        sentinel_department: Option<String>,
    ) -> Self {
        Self {
            client,
            archive_root,
            mapping,
            owners,
            sentinel_department,
        }
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    // ─── Personal ────────────────────────────────────────────────────────────

    /// Name of the user's personal folder under the archive root, if any.
    pub async fn personal_folder(&self, user_name: &str, user_id: &str) -> Option<String> {
        if let Some(folder) = self.mapping.lookup(user_id).await {
            if is_safe_component(&folder) && self.archive_root.join(&folder).is_dir() {
                tracing::debug!(user_id, folder = %folder, "Personal folder from mapping");
                return Some(folder);
            }
            tracing::warn!(user_id, folder = %folder, "Mapped personal folder does not exist");
        }

        let candidates = name_candidates(user_name);
        if candidates.is_empty() {
            return None;
        }

        let root = self.archive_root.clone();
        let owners = self.owners.clone();
        let found = tokio::task::spawn_blocking(move || {
            scan_personal_folders(&root, &candidates, owners.as_deref())
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Personal folder scan panicked");
            None
        });

        if let Some(folder) = &found {
            tracing::debug!(user_id, folder = %folder, "Personal folder matched");
        }
        found
    }

    /// Move `file` into the personal folder and open up its permissions.
    ///
    /// On error the file stays where it was.
    pub async fn archive_personal(&self, file: &Path, folder: &str) -> std::io::Result<PathBuf> {
        let filename = file.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
        let dest = self.archive_root.join(folder).join(filename);

        if let Err(e) = tokio::fs::rename(file, &dest).await {
            // Likely a different filesystem; fall back to copy + remove.
            tracing::debug!(error = %e, "Rename failed, copying instead");
            tokio::fs::copy(file, &dest).await?;
            if let Err(e) = tokio::fs::remove_file(file).await {
                tracing::warn!(path = %file.display(), error = %e, "Failed to remove source after copy");
            }
        }

        relax_permissions(&dest).await;

        tracing::info!(from = %file.display(), to = %dest.display(), "Archived to personal folder");
        Ok(dest)
    }

    // ─── Team ────────────────────────────────────────────────────────────────

    /// Department folders a recording should be copied to.
    ///
    /// Always the owner's departments; plus the sentinel department when any
    /// participant belongs to it. The participant scan stops at the first hit.
    pub async fn team_folders(
        &self,
        owner_id: &str,
        meeting_id: Option<&str>,
        user_access_token: &str,
        service_token: &str,
    ) -> BTreeSet<String> {
        let mut folders: BTreeSet<String> = self
            .department_names(service_token, owner_id)
            .await
            .into_iter()
            .collect();

        tracing::info!(owner_id, departments = ?folders, "Owner departments resolved");

        let (Some(sentinel), Some(meeting_id)) = (self.sentinel_department.as_deref(), meeting_id)
        else {
            return folders;
        };

        let participants = match self
            .client
            .get_meeting(user_access_token, meeting_id, true)
            .await
        {
            Ok(meeting) => meeting.participants,
            Err(e) => {
                tracing::warn!(meeting_id, error = %e, "Participant lookup failed");
                Vec::new()
            }
        };

        tracing::debug!(meeting_id, count = participants.len(), "Checking participant departments");

        for participant in &participants {
            let Some(participant_id) = participant.user_id.as_deref() else {
                continue;
            };
            let departments = self.department_names(service_token, participant_id).await;
            if departments.iter().any(|d| d.contains(sentinel)) {
                tracing::info!(
                    meeting_id,
                    participant = participant.user_name.as_deref().unwrap_or(participant_id),
                    department = sentinel,
                    "Sentinel department attended"
                );
                folders.insert(sentinel.to_string());
                break;
            }
        }

        folders
    }

    /// Copy `file` into every existing `team/<department>` folder.
    ///
    /// Returns the paths written. Missing folders are skipped.
    pub async fn archive_team(&self, file: &Path, folders: &BTreeSet<String>) -> Vec<PathBuf> {
        let Some(filename) = file.file_name() else {
            return Vec::new();
        };

        let mut copied = Vec::new();
        for folder in folders {
            if !is_safe_component(folder) {
                tracing::warn!(folder = %folder, "Skipping unsafe team folder name");
                continue;
            }

            let dir = self.archive_root.join(TEAM_DIR).join(folder);
            if !dir.is_dir() {
                tracing::debug!(folder = %folder, "Team folder does not exist, skipping");
                continue;
            }

            let dest = dir.join(filename);
            match tokio::fs::copy(file, &dest).await {
                Ok(_) => {
                    relax_permissions(&dest).await;
                    tracing::info!(to = %dest.display(), "Copied to team folder");
                    copied.push(dest);
                }
                Err(e) => {
                    tracing::error!(to = %dest.display(), error = %e, "Team copy failed");
                }
            }
        }
        copied
    }

    /// Department names for a user; lookup failures yield what was found.
    async fn department_names(&self, service_token: &str, user_id: &str) -> Vec<String> {
        let ids = match self
            .client
            .get_user_department_ids(service_token, user_id)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Department lookup failed");
                return Vec::new();
            }
        };

        let mut names = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.client.get_department_name(service_token, id).await {
                Ok(Some(name)) => names.push(name),
                Ok(None) => {}
                Err(e) => tracing::warn!(department_id = %id, error = %e, "Department name lookup failed"),
            }
        }
        names
    }
}

/// Lowercased names a folder may be called for this user.
fn name_candidates(user_name: &str) -> Vec<String> {
    let raw = user_name.trim().to_lowercase();
    if raw.is_empty() {
        return Vec::new();
    }

    let transliterated = transliterate(&raw);
    let mut candidates = vec![transliterated];
    if !candidates.contains(&raw) {
        candidates.push(raw);
    }
    candidates
}

/// Pinyin transliteration without tones or spaces: "张三" -> "zhangsan".
/// Characters without a reading are kept as-is.
pub fn transliterate(name: &str) -> String {
    name.chars()
        .zip(name.to_pinyin())
        .filter(|(c, _)| !c.is_whitespace())
        .map(|(c, py)| match py {
            Some(py) => py.plain().to_string(),
            None => c.to_string(),
        })
        .collect::<String>()
        .to_lowercase()
}

/// Ownership match first, then folder-name match.
fn scan_personal_folders(
    root: &Path,
    candidates: &[String],
    owners: Option<&dyn OwnerLookup>,
) -> Option<String> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "Archive root not readable");
            return None;
        }
    };

    let folders: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            (name != TEAM_DIR).then(|| (name, entry.path()))
        })
        .collect();

    if let Some(owners) = owners {
        for (name, path) in &folders {
            if let Some(owner) = owners.owner_name(path) {
                if candidates.contains(&owner.to_lowercase()) {
                    return Some(name.clone());
                }
            }
        }
    }

    folders
        .into_iter()
        .find(|(name, _)| candidates.contains(&name.to_lowercase()))
        .map(|(name, _)| name)
}

/// A single, non-traversing path component.
fn is_safe_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Let the storage-owning account manage archived files.
async fn relax_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).await
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to relax permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedOwners(HashMap<PathBuf, String>);

    impl OwnerLookup for FixedOwners {
        fn owner_name(&self, path: &Path) -> Option<String> {
            self.0.get(path).cloned()
        }
    }

    #[test]
    fn transliterates_chinese_names() {
        assert_eq!(transliterate("张三"), "zhangsan");
        assert_eq!(transliterate("Shelly"), "shelly");
        assert_eq!(transliterate("李 四"), "lisi");
    }

    #[test]
    fn candidates_include_raw_and_pinyin() {
        assert_eq!(name_candidates(" 张三 "), vec!["zhangsan", "张三"]);
        assert_eq!(name_candidates("Shelly"), vec!["shelly"]);
        assert!(name_candidates("   ").is_empty());
    }

    #[test]
    fn scan_prefers_owner_over_folder_name() {
        let dir = tempfile::tempdir().unwrap();
        let owned = dir.path().join("1001");
        let named = dir.path().join("zhangsan");
        std::fs::create_dir(&owned).unwrap();
        std::fs::create_dir(&named).unwrap();

        let owners = FixedOwners(HashMap::from([(owned.clone(), "ZhangSan".to_string())]));
        let candidates = name_candidates("张三");

        assert_eq!(
            scan_personal_folders(dir.path(), &candidates, Some(&owners)).as_deref(),
            Some("1001")
        );
        assert_eq!(
            scan_personal_folders(dir.path(), &candidates, None).as_deref(),
            Some("zhangsan")
        );
    }

    #[test]
    fn scan_matches_case_insensitively_and_ignores_team() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Shelly")).unwrap();
        std::fs::create_dir(dir.path().join(TEAM_DIR)).unwrap();

        assert_eq!(
            scan_personal_folders(dir.path(), &name_candidates("shelly"), None).as_deref(),
            Some("Shelly")
        );
        assert_eq!(
            scan_personal_folders(dir.path(), &name_candidates("team"), None),
            None
        );
    }

    #[test]
    fn unsafe_components_are_rejected() {
        assert!(is_safe_component("Eng"));
        assert!(is_safe_component("人力资源部"));
        assert!(!is_safe_component(".."));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component(""));
    }
}
