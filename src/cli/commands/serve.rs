//! Serve command - run the live-reload HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use crate::config::Settings;
use crate::watcher::path_guard;

/// Arguments for the serve command.
#[derive(Debug, Default)]
pub struct ServeArgs {
    pub files: Vec<PathBuf>,
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub root: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, mut config: Settings) -> anyhow::Result<()> {
    apply_overrides(&mut config, &args)?;
    let files = resolve_files(&args.files, &config)?;

    #[cfg(feature = "http-server")]
    let result = crate::server::serve_http(config, files).await;

    #[cfg(not(feature = "http-server"))]
    let result = {
        let _ = (config, files);
        Err(anyhow::anyhow!(
            "HTTP server support is not compiled in. Rebuild with --features http-server"
        ))
    };

    result
}

/// Fold CLI flags into the loaded settings and canonicalize the root.
pub fn apply_overrides(config: &mut Settings, args: &ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }

    if let Some(port) = args.port {
        config.server.bind = match config.server.bind.parse::<SocketAddr>() {
            Ok(mut addr) => {
                addr.set_port(port);
                addr.to_string()
            }
            Err(_) => format!("127.0.0.1:{port}"),
        };
    }

    if let Some(ms) = args.debounce_ms {
        config.watch.debounce_ms = ms;
    }

    if let Some(root) = &args.root {
        config.root = Some(root.clone());
    }

    if let Some(root) = config.root.take() {
        let resolved = path_guard::resolve(&root)
            .with_context(|| format!("Invalid root directory {}", root.display()))?;
        if !resolved.is_dir() {
            bail!("Root {} is not a directory", resolved.display());
        }
        config.root = Some(resolved);
    }

    Ok(())
}

/// Validate every file named on the command line.
///
/// Files must exist, be regular files and sit under the root when one is set.
pub fn resolve_files(files: &[PathBuf], config: &Settings) -> anyhow::Result<Vec<PathBuf>> {
    files
        .iter()
        .map(|file| {
            let canonical = path_guard::validate(file, config.root.as_deref())
                .with_context(|| format!("Cannot serve {}", file.display()))?;
            path_guard::ensure_regular_file(&canonical)
                .with_context(|| format!("Cannot serve {}", file.display()))?;
            Ok(canonical)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_port_keeps_host() {
        let mut config = Settings::default();
        config.server.bind = "0.0.0.0:3000".to_string();
        let args = ServeArgs {
            port: Some(4100),
            ..Default::default()
        };

        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:4100");
    }

    #[test]
    fn test_bind_and_debounce_override() {
        let mut config = Settings::default();
        let args = ServeArgs {
            bind: Some("127.0.0.1:9000".to_string()),
            debounce_ms: Some(25),
            ..Default::default()
        };

        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.watch.debounce_ms, 25);
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.md");
        std::fs::write(&file, "# a").unwrap();

        let mut config = Settings::default();
        let args = ServeArgs {
            root: Some(file),
            ..Default::default()
        };
        assert!(apply_overrides(&mut config, &args).is_err());
    }

    #[test]
    fn test_resolve_files() {
        let temp_dir = TempDir::new().unwrap();
        let inside = temp_dir.path().join("docs");
        std::fs::create_dir(&inside).unwrap();
        let good = inside.join("a.md");
        std::fs::write(&good, "# a").unwrap();
        let outside = temp_dir.path().join("b.md");
        std::fs::write(&outside, "# b").unwrap();

        let mut config = Settings::default();
        let args = ServeArgs {
            root: Some(inside.clone()),
            ..Default::default()
        };
        apply_overrides(&mut config, &args).unwrap();

        let files = resolve_files(std::slice::from_ref(&good), &config).unwrap();
        assert_eq!(files, vec![good.canonicalize().unwrap()]);

        assert!(resolve_files(&[outside], &config).is_err());
        assert!(resolve_files(&[inside.join("missing.md")], &config).is_err());
        assert!(resolve_files(&[inside], &config).is_err());
    }
}
