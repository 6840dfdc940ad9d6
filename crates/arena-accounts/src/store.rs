//! JSON account file
//!
//! The file is a JSON array of account records; order is preserved so the
//! operator's listing and launch order stay stable. All writes use atomic
//! temp-file + rename, and a tokio Mutex serializes writers, so checkpoints
//! from many session units never interleave.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Checkpoint;
use crate::account::Account;
use crate::error::{Error, Result};

pub struct AccountStore {
    path: PathBuf,
    state: Mutex<Vec<Account>>,
}

impl AccountStore {
    /// Load accounts from the given file path.
    ///
    /// If the file doesn't exist, creates it as `[]` (cold start with zero
    /// accounts). Duplicate ids are rejected.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading account file: {e}")))?;
            let accounts: Vec<Account> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing account file: {e}")))?;
            check_unique(&accounts)?;
            info!(path = %path.display(), accounts = accounts.len(), "loaded accounts");
            accounts
        } else {
            info!(path = %path.display(), "account file not found, starting with empty store");
            let accounts = Vec::new();
            write_atomic(&path, &accounts).await?;
            accounts
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every account, in file order.
    pub async fn accounts(&self) -> Vec<Account> {
        self.state.lock().await.clone()
    }

    pub async fn get(&self, account_id: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.iter().find(|a| a.id == account_id).cloned()
    }

    /// Replace an account by id (or append it) and persist.
    ///
    /// A stored `Quarantined` status is never overwritten by `Active`.
    pub async fn upsert(&self, account: &Account) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => {
                let keep_quarantine = existing.is_quarantined() && !account.is_quarantined();
                let reason = existing.quarantine_reason.clone();
                *existing = account.clone();
                if keep_quarantine {
                    warn!(account_id = %account.id, "ignoring attempt to un-quarantine account");
                    existing.quarantine(reason.unwrap_or_else(|| "quarantined".to_string()));
                }
            }
            None => state.push(account.clone()),
        }
        debug!(account_id = %account.id, "saved account");
        write_atomic(&self.path, &state).await
    }

    /// Zero the open-cycle cursor and drop any held entitlement.
    pub async fn reset_progress(&self, account_id: &str) -> Result<Account> {
        self.modify(account_id, |account| {
            account.progress.reset_cursor();
            account.clear_entitlement();
        })
        .await
    }

    pub async fn clear_entitlement(&self, account_id: &str) -> Result<Account> {
        self.modify(account_id, Account::clear_entitlement).await
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn modify(&self, account_id: &str, f: impl FnOnce(&mut Account)) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in account file")))?;
        f(account);
        let updated = account.clone();
        write_atomic(&self.path, &state).await?;
        debug!(account_id, "updated account");
        Ok(updated)
    }
}

impl Checkpoint for AccountStore {
    fn save<'a>(&'a self, account: &'a Account) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.upsert(account))
    }
}

fn check_unique(accounts: &[Account]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for account in accounts {
        if !seen.insert(account.id.as_str()) {
            return Err(Error::Invalid(format!("duplicate account id {}", account.id)));
        }
    }
    Ok(())
}

/// Write accounts to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains passwords and session tokens.
async fn write_atomic(path: &Path, data: &[Account]) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing accounts: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => return Err(Error::Io("account path has no parent directory".into())),
    };

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), "persisted accounts");
    Ok(())
}
