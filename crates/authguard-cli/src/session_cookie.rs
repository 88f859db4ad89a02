//! Session cookie persistence between CLI invocations.
//!
//! The server owns the session marker cookie. A browser keeps it across page
//! loads; here the jar's cookies are written to `session.cookie` in the config
//! directory after each command and loaded into a fresh jar before the next.
//! Each entry keeps the origin it came from and its expiry, so a cookie is
//! only restored for the server that set it and never past its deadline.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use authguard::token::now_ms;
use authguard::{SavedCookie, SessionJar};
use url::Url;

const SESSION_FILE: &str = "session.cookie";

/// Where the session cookies are kept, if a config directory is known.
pub fn session_file() -> Option<PathBuf> {
    authguard_config::xdg_config_dir().map(|d| d.join(SESSION_FILE))
}

/// Load unexpired cookies saved for `url`'s origin into `jar`. Returns how many were added.
pub fn restore(jar: &SessionJar, url: &Url, path: &Path) -> Result<usize> {
    let saved = read_saved(path)?;
    Ok(jar.restore(&saved, url))
}

/// Save the jar's cookies for `url`, keeping entries saved for other servers.
///
/// The file is removed once no live entries remain.
pub fn persist(jar: &SessionJar, url: &Url, path: &Path) -> Result<()> {
    let now = now_ms();
    let mut saved = read_saved(path)?;
    saved.retain(|c| !c.is_for(url) && !c.is_expired(now));
    saved.extend(jar.snapshot(url));

    if saved.is_empty() {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Removed session cookie file");
        }
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&saved)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// An unreadable file is treated as empty; the next persist replaces it.
fn read_saved(path: &Path) -> Result<Vec<SavedCookie>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    match serde_json::from_str(&contents) {
        Ok(saved) => Ok(saved),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable session cookie file");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn url() -> Url {
        Url::parse("http://nvr.local:8888/").unwrap()
    }

    fn other() -> Url {
        Url::parse("http://backup.local:8888/").unwrap()
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = TempDir::new().unwrap();
        let jar = SessionJar::new();
        let restored = restore(&jar, &url(), &dir.path().join("session.cookie")).unwrap();
        assert_eq!(restored, 0);
        assert!(jar.cookies(&url()).is_none());
    }

    #[test]
    fn test_persist_then_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.cookie");

        let jar = SessionJar::new();
        jar.add_cookie_str("user=admin; Path=/", &url());
        persist(&jar, &url(), &path).unwrap();

        let fresh = SessionJar::new();
        assert_eq!(restore(&fresh, &url(), &path).unwrap(), 1);
        let header = fresh.cookies(&url()).unwrap();
        assert_eq!(header.to_str().unwrap(), "user=admin");
    }

    #[test]
    fn test_expired_cookie_is_not_restored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.cookie");

        let jar = SessionJar::new();
        jar.add_cookie_str("user=admin; Path=/; Max-Age=1", &url());
        persist(&jar, &url(), &path).unwrap();

        std::thread::sleep(Duration::from_millis(1500));
        assert!(jar.cookies(&url()).is_none());

        let fresh = SessionJar::new();
        assert_eq!(restore(&fresh, &url(), &path).unwrap(), 0);
        assert!(fresh.cookies(&url()).is_none());
    }

    #[test]
    fn test_saved_expiry_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.cookie");

        let jar = SessionJar::new();
        jar.add_cookie_str("user=admin; Path=/; Max-Age=3600", &url());
        persist(&jar, &url(), &path).unwrap();

        let saved: Vec<SavedCookie> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].expires_at.unwrap() > now_ms() + 3_500_000);
    }

    #[test]
    fn test_cookie_is_only_restored_for_its_server() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.cookie");

        let jar = SessionJar::new();
        jar.add_cookie_str("user=admin; Path=/", &url());
        persist(&jar, &url(), &path).unwrap();

        let elsewhere = SessionJar::new();
        assert_eq!(restore(&elsewhere, &other(), &path).unwrap(), 0);
        assert!(elsewhere.cookies(&other()).is_none());

        // Saving for the second server keeps the first server's entry.
        elsewhere.add_cookie_str("user=backup; Path=/", &other());
        persist(&elsewhere, &other(), &path).unwrap();

        let first = SessionJar::new();
        assert_eq!(restore(&first, &url(), &path).unwrap(), 1);
        assert_eq!(first.cookies(&url()).unwrap().to_str().unwrap(), "user=admin");
        let second = SessionJar::new();
        assert_eq!(restore(&second, &other(), &path).unwrap(), 1);
        assert_eq!(second.cookies(&other()).unwrap().to_str().unwrap(), "user=backup");
    }

    #[test]
    fn test_persist_empty_jar_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.cookie");

        let jar = SessionJar::new();
        jar.add_cookie_str("user=admin; Path=/", &url());
        persist(&jar, &url(), &path).unwrap();
        assert!(path.exists());

        persist(&SessionJar::new(), &url(), &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_unreadable_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.cookie");
        std::fs::write(&path, "user=admin\n").unwrap();

        let jar = SessionJar::new();
        assert_eq!(restore(&jar, &url(), &path).unwrap(), 0);

        jar.add_cookie_str("user=admin; Path=/", &url());
        persist(&jar, &url(), &path).unwrap();
        assert_eq!(restore(&SessionJar::new(), &url(), &path).unwrap(), 1);
    }
}
