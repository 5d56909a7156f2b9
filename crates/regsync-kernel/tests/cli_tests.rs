use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const MANIFEST: &str = r#"{
  "resources": [
    { "type": "key", "path": "HKLM\\Software\\Vendor\\T1" },
    { "type": "key", "path": "32:HKLM\\Software\\Vendor\\T1" },
    { "type": "value", "path": "HKLM\\Software\\Vendor\\T1", "name": "Level",
      "data": { "type": "dword", "value": 1 } },
    { "type": "value", "path": "HKLM\\Software\\Vendor\\T1\\Name",
      "data": { "type": "string", "value": "regsync" },
      "requires": ["Registry_value[HKLM\\Software\\Vendor\\T1\\Level]"] }
  ]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn manifest(&self, json: &str) -> PathBuf {
        let path = self.dir.path().join("manifest.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn state(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    fn run(&self, subcommand: &str, manifest: &Path, extra: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_regsync"))
            .arg(subcommand)
            .arg(manifest)
            .args(["--backend", "memory", "--arch", "x64", "--state"])
            .arg(self.state())
            .args(extra)
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_apply_converges_and_persists_state() {
    let ws = Workspace::new();
    let manifest = ws.manifest(MANIFEST);

    let first = ws.run("apply", &manifest, &[]);
    assert_eq!(first.status.code(), Some(0), "stderr: {}", stderr(&first));
    let out = stdout(&first);
    assert!(out.contains(r"Registry_key[HKLM\Software\Vendor\T1].ensure: created"));
    assert!(out.contains(r"Registry_key[32:HKLM\Software\Vendor\T1].ensure: created"));
    assert!(out.contains(r"Registry_value[HKLM\Software\Vendor\T1\Name].ensure: created"));
    assert!(out.contains("4 changed, 0 unchanged, 0 failed, 0 skipped"));
    assert!(ws.state().exists());

    let second = ws.run("apply", &manifest, &[]);
    assert_eq!(second.status.code(), Some(0));
    let out = stdout(&second);
    assert!(!out.contains("ensure: created"));
    assert!(out.contains("0 changed, 4 unchanged"));
}

#[test]
fn test_verbose_lists_unchanged_resources() {
    let ws = Workspace::new();
    let manifest = ws.manifest(MANIFEST);
    ws.run("apply", &manifest, &[]);

    let output = ws.run("apply", &manifest, &["--verbose"]);
    assert!(stdout(&output).contains(r"Registry_key[HKLM\Software\Vendor\T1].ensure: unchanged"));
}

#[test]
fn test_json_report() {
    let ws = Workspace::new();
    let manifest = ws.manifest(MANIFEST);

    let output = ws.run("apply", &manifest, &["--format", "json"]);
    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["summary"]["changed"], 4);
    assert_eq!(report["outcomes"].as_array().unwrap().len(), 4);
    assert_eq!(report["outcomes"][0]["status"], "changed");
}

#[test]
fn test_plan_lists_actions_without_applying() {
    let ws = Workspace::new();
    let manifest = ws.manifest(MANIFEST);

    let output = ws.run("plan", &manifest, &[]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let lines: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 4);
    assert!(lines.contains(&r"create_key Registry_key[HKLM\Software\Vendor\T1]".to_string()));
    let set_level = r"set_value Registry_value[HKLM\Software\Vendor\T1\Level] = 1";
    assert!(lines.iter().any(|line| line == set_level));

    let level = lines.iter().position(|l| l.contains(r"T1\Level")).unwrap();
    let name = lines.iter().position(|l| l.contains(r"T1\Name")).unwrap();
    assert!(level < name);
    assert!(!ws.state().exists());
}

#[test]
fn test_failed_resources_exit_with_one() {
    let ws = Workspace::new();
    let manifest = ws.manifest(
        r#"{ "resources": [
            { "type": "value", "path": "HKLM\\Software\\Missing\\V",
              "data": { "type": "string", "value": "x" } },
            { "type": "key", "path": "HKLM\\Software\\Present" }
        ] }"#,
    );

    let output = ws.run("apply", &manifest, &[]);
    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains(r"err: Registry_value[HKLM\Software\Missing\V]"));
    assert!(out.contains(r"Registry_key[HKLM\Software\Present].ensure: created"));
}

#[test]
fn test_plan_with_failed_resources_exits_with_one() {
    let ws = Workspace::new();
    let manifest = ws.manifest(
        r#"{ "resources": [
            { "type": "value", "path": "HKLM\\Software\\Missing\\V",
              "data": { "type": "string", "value": "x" } },
            { "type": "key", "path": "HKLM\\Software\\Present" }
        ] }"#,
    );

    let output = ws.run("plan", &manifest, &[]);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains(r"err: Registry_value[HKLM\Software\Missing\V]"));
    assert!(out.contains(r"create_key Registry_key[HKLM\Software\Present]"));
    assert!(!ws.state().exists());
}

#[test]
fn test_invalid_declarations_exit_with_two_and_apply_nothing() {
    let ws = Workspace::new();
    let manifest = ws.manifest(
        r#"{ "resources": [
            { "type": "key", "path": "HKLM\\Software\\A",
              "requires": ["Registry_key[HKLM\\Software\\B]"] },
            { "type": "key", "path": "HKLM\\Software\\B",
              "requires": ["Registry_key[HKLM\\Software\\A]"] },
            { "type": "key", "path": "HKLM\\Software\\C" }
        ] }"#,
    );

    let output = ws.run("apply", &manifest, &[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("err: dependency cycle"));
    assert!(stdout(&output).is_empty());
    assert!(!ws.state().exists());
}

#[test]
fn test_malformed_manifests_exit_with_two() {
    let ws = Workspace::new();
    for json in [
        r#"{ "resources": [ { "type": "key", "path": "HKXX\\Software" } ] }"#,
        r#"{ "resources": [ { "type": "key", "path": "HKLM\\Software", "colour": "red" } ] }"#,
        "not json",
    ] {
        let manifest = ws.manifest(json);
        let output = ws.run("apply", &manifest, &[]);
        assert_eq!(output.status.code(), Some(2), "manifest: {json}");
        assert!(stderr(&output).contains("err:"));
    }
}

#[test]
fn test_parse_prints_canonical_identity() {
    let parse = |args: &[&str]| {
        let output = Command::new(env!("CARGO_BIN_EXE_regsync"))
            .arg("parse")
            .args(args)
            .output()
            .unwrap();
        (output.status.code(), stdout(&output).trim().to_string())
    };

    assert_eq!(
        parse(&[r"HKEY_LOCAL_MACHINE\Software\\Vendor", "--arch", "x64"]),
        (Some(0), r"Registry_key[HKLM\Software\Vendor]".to_string())
    );
    assert_eq!(
        parse(&[r"32:HKLM\Software\Vendor", "--arch", "x64"]),
        (Some(0), r"Registry_key[32:HKLM\Software\Vendor]".to_string())
    );
    assert_eq!(
        parse(&[r"32:HKLM\Software\Vendor", "--arch", "x86"]),
        (Some(0), r"Registry_key[HKLM\Software\Vendor]".to_string())
    );
    assert_eq!(
        parse(&[r"Registry_value[HKCU\Software\Vendor\\]", "--arch", "x64"]),
        (Some(0), r"Registry_value[HKCU\Software\Vendor\\]".to_string())
    );
    assert_eq!(parse(&["HKXX\\Software"]).0, Some(2));
}
