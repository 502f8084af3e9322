#[cfg(test)]
mod cli {
    use std::error::Error;
    use std::fs;
    use std::path::{Path, PathBuf};

    use assert_cmd::{Command, cargo::cargo_bin_cmd};
    use predicates::prelude::PredicateBooleanExt;
    use predicates::str::contains;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tempfile::{TempDir, tempdir};
    use wiremock::matchers::{any, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    /// Create a mock server which answers every request with `status`
    macro_rules! mock_server {
        ($status:expr) => {{
            let mock_server = MockServer::start().await;
            Mock::given(any())
                .respond_with(ResponseTemplate::new($status))
                .mount(&mock_server)
                .await;
            mock_server
        }};
    }

    /// A scratch working directory with a target list in it
    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new(rows: &[(&str, String)]) -> Result<Self> {
            let dir = tempdir()?;
            let csv: String = rows
                .iter()
                .map(|(identifier, url)| format!("{identifier},{url}\n"))
                .collect();
            fs::write(dir.path().join("targets.csv"), csv)?;
            Ok(Self { dir })
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn cache_dir(&self) -> PathBuf {
            self.dir.path().join("cache")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("linkvet");
            cmd.current_dir(self.path());
            cmd
        }

        fn check(&self) -> Command {
            let mut cmd = self.cmd();
            cmd.arg("check").arg("targets.csv");
            cmd
        }
    }

    #[tokio::test]
    async fn test_all_accessible() -> Result<()> {
        let server = mock_server!(200);
        let workspace = Workspace::new(&[("sp-1", format!("{}/privacy", server.uri()))])?;

        workspace
            .check()
            .arg("--no-cache")
            .assert()
            .success()
            .stdout(contains("✔ [200]"))
            .stdout(contains("(sp-1)"))
            .stdout(contains("1 total"));
        Ok(())
    }

    #[tokio::test]
    async fn test_inaccessible_link_fails() -> Result<()> {
        let server = mock_server!(404);
        let workspace = Workspace::new(&[("sp-1", format!("{}/gone", server.uri()))])?;

        workspace
            .check()
            .arg("--no-cache")
            .assert()
            .failure()
            .code(2)
            .stdout(contains("http_error: Not Found"))
            .stdout(contains("1 failed"));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_rows_are_reported() -> Result<()> {
        let workspace = Workspace::new(&[("a", "not a url".into()), ("b", "ftp://example.org/".into())])?;

        workspace
            .check()
            .arg("--no-cache")
            .assert()
            .code(2)
            .stdout(contains("malformed_url").count(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_stdin() -> Result<()> {
        let server = mock_server!(200);
        let workspace = Workspace::new(&[])?;

        workspace
            .cmd()
            .args(["check", "-", "--no-cache"])
            .write_stdin(format!("x,{}/a\ny,{}/b\n", server.uri(), server.uri()))
            .assert()
            .success()
            .stdout(contains("2 total"));
        Ok(())
    }

    #[tokio::test]
    async fn test_json_output() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let workspace = Workspace::new(&[
            ("ok", format!("{}/ok", server.uri())),
            ("missing", format!("{}/missing", server.uri())),
        ])?;

        let output = workspace
            .check()
            .args(["--no-cache", "--format", "json", "--host-stats"])
            .output()?;
        assert_eq!(output.status.code(), Some(2));

        let json: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(json["report"]["total"], 2);
        assert_eq!(json["report"]["accessible"], 1);
        assert_eq!(json["report"]["status"], "completed");
        assert_eq!(json["results"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["host_stats"]["127.0.0.1"]["total_requests"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let workspace = Workspace::new(&[("sp-1", format!("{}/privacy", server.uri()))])?;
        let cache_dir = workspace.cache_dir();

        workspace
            .check()
            .arg("--cache-dir")
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(contains("[cached]").not());

        workspace
            .check()
            .arg("--cache-dir")
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(contains("[cached]"))
            .stdout(contains("Cache: 1 hits, 0 misses, 1 entries"));

        workspace
            .cmd()
            .args(["cache", "stats", "--cache-dir"])
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(contains("1 entries"));

        workspace
            .cmd()
            .args(["cache", "clear", "--cache-dir"])
            .arg(&cache_dir)
            .assert()
            .success()
            .stdout(contains("Removed 1 entries"));
        Ok(())
    }

    #[tokio::test]
    async fn test_default_cache_dir() -> Result<()> {
        let server = mock_server!(200);
        let workspace = Workspace::new(&[("sp-1", format!("{}/", server.uri()))])?;

        workspace.check().assert().success();
        assert!(workspace.path().join(".linkvetcache").is_dir());
        Ok(())
    }

    #[test]
    fn test_cache_sweep_json() -> Result<()> {
        let workspace = Workspace::new(&[])?;

        let output = workspace
            .cmd()
            .args(["cache", "sweep", "--format", "json", "--cache-dir"])
            .arg(workspace.cache_dir())
            .output()?;
        assert!(output.status.success());
        let json: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(json["expired"], 0);
        assert_eq!(json["remaining"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_config_file() -> Result<()> {
        let server = mock_server!(200);
        let workspace = Workspace::new(&[("sp-1", format!("{}/", server.uri()))])?;
        fs::write(
            workspace.path().join("linkvet.toml"),
            "format = \"json\"\nno_cache = true\ntimeout = \"5s\"\n",
        )?;

        let output = workspace.check().output()?;
        assert!(output.status.success());
        let json: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(json["report"]["total"], 1);
        assert!(!workspace.path().join(".linkvetcache").exists());
        Ok(())
    }

    #[test]
    fn test_invalid_config_file() -> Result<()> {
        let workspace = Workspace::new(&[])?;
        let config = workspace.path().join("custom.toml");
        fs::write(&config, "concurency = 4\n")?;

        workspace
            .check()
            .arg("--config")
            .arg(&config)
            .assert()
            .failure()
            .code(3)
            .stderr(contains("Cannot load configuration file"));
        Ok(())
    }

    #[test]
    fn test_missing_explicit_config_file() -> Result<()> {
        let workspace = Workspace::new(&[])?;
        workspace
            .check()
            .args(["--config", "nope.toml"])
            .assert()
            .code(3);
        Ok(())
    }

    #[test]
    fn test_invalid_policy() -> Result<()> {
        let workspace = Workspace::new(&[])?;
        workspace
            .check()
            .args(["--no-cache", "--concurrency", "0"])
            .assert()
            .code(3)
            .stderr(contains("Invalid validation policy"));
        Ok(())
    }

    #[test]
    fn test_missing_target_file() -> Result<()> {
        let workspace = Workspace::new(&[])?;
        workspace
            .cmd()
            .args(["check", "nope.csv"])
            .assert()
            .code(1)
            .stderr(contains("Cannot open target file"));
        Ok(())
    }
}
