//! Shared test fixtures.
//!
//! Builds a self-contained lane under a temp directory with a fake `java`
//! launcher standing in for the apktool/signer jars. The fake honors the
//! real argv contracts: `-jar <apktool> d <src> -o <dest> --force-all`,
//! `-jar <apktool> b <tree> -o <out> --force-all`, and
//! `-jar <signer> --apks <apk> --out <dir> --allowResign --verbose` with the
//! `-aligned-debugSigned.apk` output name.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use apk_forge::config::ForgeConfig;

/// Fake toolchain that behaves: unpack produces the expected tree (treating
/// the source APK's bytes as the embedded config), repack rebuilds an APK
/// from the config, and the signer emits its derived-name output.
pub const STANDARD_TOOLS: &str = r#"#!/bin/sh
jar="$2"
case "$jar" in
  *apktool*)
    if [ "$3" = "d" ]; then
      mkdir -p "$6/assets/flutter_assets/assets"
      cp "$4" "$6/assets/flutter_assets/assets/config.json"
    else
      cp "$4/assets/flutter_assets/assets/config.json" "$6"
    fi
    ;;
  *uber-apk-signer*)
    name=$(basename "$4" .apk)
    cp "$4" "$6/$name-aligned-debugSigned.apk"
    ;;
esac
exit 0
"#;

/// Unpack succeeds but produces a tree with no config file.
pub const NO_CONFIG_TOOLS: &str = r#"#!/bin/sh
jar="$2"
case "$jar" in
  *apktool*)
    if [ "$3" = "d" ]; then
      mkdir -p "$6/assets"
    fi
    ;;
esac
exit 0
"#;

/// Every invocation hangs far past any test timeout.
pub const SLEEPY_TOOLS: &str = r#"#!/bin/sh
sleep 30
exit 0
"#;

/// Every invocation fails outright.
pub const FAILING_TOOLS: &str = r#"#!/bin/sh
echo "brut.androlib.AndrolibException: boom" >&2
exit 1
"#;

/// Floods stdout past any small output cap.
pub const NOISY_TOOLS: &str = r#"#!/bin/sh
head -c 2000000 /dev/zero | tr '\0' 'x'
exit 0
"#;

/// apktool works; the signer exits 0 without producing its output.
pub const LAZY_SIGNER_TOOLS: &str = r#"#!/bin/sh
jar="$2"
case "$jar" in
  *apktool*)
    if [ "$3" = "d" ]; then
      mkdir -p "$6/assets/flutter_assets/assets"
      cp "$4" "$6/assets/flutter_assets/assets/config.json"
    else
      cp "$4/assets/flutter_assets/assets/config.json" "$6"
    fi
    ;;
esac
exit 0
"#;

/// A lane rooted in a temp directory.
pub struct LaneFixture {
    pub root: TempDir,
    pub config: ForgeConfig,
}

impl LaneFixture {
    /// Build a lane with the given fake-tool script and fast test timings.
    pub fn new(tools_script: &str) -> Self {
        let root = TempDir::new().expect("fixture temp dir");
        let base = root.path();

        let java = write_fake_java(base, tools_script);
        let apktool_jar = base.join("tools/apktool.jar");
        let signer_jar = base.join("tools/uber-apk-signer.jar");
        fs::create_dir_all(base.join("tools")).expect("tools dir");
        fs::write(&apktool_jar, "jar").expect("apktool jar");
        fs::write(&signer_jar, "jar").expect("signer jar");

        let source_apk = base.join("uploads/release.apk");
        fs::create_dir_all(base.join("uploads")).expect("uploads dir");
        fs::write(&source_apk, r#"{"apiUrl":"https://original.example"}"#)
            .expect("source apk");

        let mut config = ForgeConfig::default();
        config.paths.source_apk = source_apk;
        config.paths.store_dir = base.join("store");
        config.paths.registry_dir = base.join("registry");
        config.paths.workspace_root = base.join("workspaces");
        config.tools.java_bin = java.to_string_lossy().into_owned();
        config.tools.apktool_jar = apktool_jar;
        config.tools.signer_jar = signer_jar;
        config.limits.stage_timeout_seconds = 20;
        config.cleanup.success_delay_ms = 10;
        config.cleanup.failure_delay_ms = 10;
        config.cleanup.retry_delay_ms = 50;

        Self { root, config }
    }

    /// Workspace root for reclamation assertions.
    pub fn workspace_root(&self) -> PathBuf {
        self.config.paths.workspace_root.clone()
    }

    /// Remove the apktool jar so the unpack stage sees a missing tool.
    pub fn drop_apktool(&self) {
        fs::remove_file(&self.config.tools.apktool_jar).expect("remove apktool jar");
    }
}

/// Write an executable fake `java` into `<base>/bin/java`.
pub fn write_fake_java(base: &Path, script: &str) -> PathBuf {
    let bin = base.join("bin");
    fs::create_dir_all(&bin).expect("bin dir");
    let java = bin.join("java");
    fs::write(&java, script).expect("fake java");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).expect("chmod fake java");
    }

    java
}

/// Poll until `path` no longer exists, up to `budget`.
pub fn wait_for_removal(path: &Path, budget: std::time::Duration) -> bool {
    let deadline = std::time::Instant::now() + budget;
    while std::time::Instant::now() < deadline {
        if !path.exists() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    false
}

/// Poll until the workspace root holds no job directories, up to `budget`.
pub fn wait_for_empty_dir(path: &Path, budget: std::time::Duration) -> bool {
    let deadline = std::time::Instant::now() + budget;
    while std::time::Instant::now() < deadline {
        let occupied = fs::read_dir(path)
            .map(|entries| entries.count() > 0)
            .unwrap_or(false);
        if !occupied {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    false
}
