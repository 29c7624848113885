//! Shared fixtures: a temp workspace with `promote.toml`, profiles and shell
//! stand-ins for the migration utility and the object-store client.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use promote_core::{
    Capability, DeploymentKind, DeploymentUnit, EntityRef, PromoteConfig, RollbackReference,
    StaticCredentials, StorageKind,
};
use promote_deploy::{Orchestrator, RollbackEngine};
use tempfile::TempDir;

/// Flags string of a profile that only replaces workflows.
pub const WORKFLOW_ONLY: &str = "NNNNYNNNNNNNNNNNNNNNNNNNN";

pub struct Harness {
    pub dir: TempDir,
    storage: StorageKind,
}

impl Harness {
    pub fn new(storage: StorageKind) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["profiles", "artifacts", "bucket-root"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        executable(&root.join("kmigrator.sh"), &FAKE_KMIGRATOR.replace("{log}", &root.join("calls.log").to_string_lossy()));
        executable(&root.join("aws"), &FAKE_AWS.replace("{root}", &root.join("bucket-root").to_string_lossy()));

        let harness = Self { dir, storage };
        harness.write_profile("functional", DeploymentKind::Functional, &[Capability::ReplaceWorkflow], &[]);
        harness
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state(&self) -> PathBuf {
        self.root().join("state")
    }

    pub fn config(&self) -> PromoteConfig {
        let root = self.root().to_string_lossy();
        let content = CONFIG
            .replace("{root}", &root)
            .replace("{storage}", &self.storage.to_string());
        let config = PromoteConfig::from_toml(&content, "promote.toml").unwrap();
        config.validate().unwrap();
        config
    }

    pub fn vars(&self, pipeline_id: &str) -> StaticCredentials {
        StaticCredentials::new()
            .with("PPM_USERNAME", "admin")
            .with("PPM_PASSWORD", "s3cret")
            .with("AWS_ACCESS_KEY_ID", "minio")
            .with("AWS_SECRET_ACCESS_KEY", "minio-secret")
            .with("CI_PIPELINE_ID", pipeline_id)
            .with("CI_COMMIT_SHA", "0123abcd")
    }

    pub fn orchestrator(&self, unit: &DeploymentUnit, pipeline_id: &str) -> Orchestrator {
        Orchestrator::from_config(&self.config(), unit, &self.vars(pipeline_id)).unwrap()
    }

    pub fn engine(&self, unit: &DeploymentUnit) -> RollbackEngine {
        RollbackEngine::from_config(&self.config(), unit, &self.vars("rollback")).unwrap()
    }

    pub fn write_profile(&self, name: &str, kind: DeploymentKind, enabled: &[Capability], entities: &[(u32, &str)]) {
        let mut content = format!("name = \"{name}\"\nkind = \"{kind}\"\n");
        for (id, label) in entities {
            content.push_str(&format!("\n[[entities]]\nid = {id}\nname = \"{label}\"\n"));
        }
        content.push_str("\n[flags]\n");
        for capability in Capability::TABLE {
            content.push_str(&format!("{} = {}\n", capability.key(), enabled.contains(&capability)));
        }
        std::fs::write(self.root().join("profiles").join(format!("{name}.toml")), content).unwrap();
    }

    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.trim().to_string())
            .collect()
    }

    pub fn extract_calls(&self) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with("extract ")).collect()
    }

    pub fn import_calls(&self) -> Vec<String> {
        let mut calls: Vec<String> = self.calls().into_iter().filter(|c| c.starts_with("import ")).collect();
        calls.sort();
        calls
    }

    /// Copy the state directory to where downloaded artifacts of
    /// `pipeline_id` would be.
    pub fn publish_artifacts(&self, pipeline_id: &str) {
        copy_dir(&self.state(), &self.root().join("artifacts").join(pipeline_id).join("state"));
    }
}

pub fn unit(source: &str, target: &str, entities: Vec<EntityRef>) -> DeploymentUnit {
    DeploymentUnit {
        version: "2.1.0".into(),
        change_request: Some("CR-2048".into()),
        source: source.into(),
        target: target.into(),
        profile: "functional".into(),
        entities,
        rollback_reference: None,
        description: Some("workflow fixes".into()),
        created_by: Some("release-bot".into()),
    }
}

pub fn rollback_unit(target: &str, reference: RollbackReference) -> DeploymentUnit {
    let source = if target == "test-ppm" { "dev-ppm" } else { "test-ppm" };
    DeploymentUnit {
        rollback_reference: Some(reference),
        ..unit(source, target, Vec::new())
    }
}

fn executable(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

const CONFIG: &str = r#"
[deployment]
execution = "local"
storage = "{storage}"
state_dir = "{root}/state"
staging_dir = "{root}/staging"
profiles_dir = "{root}/profiles"
concurrency = 2

[kmigrator]
extract_script = "{root}/kmigrator.sh"
import_script = "{root}/kmigrator.sh"
interpreter = "sh"
timeout_secs = 30

[default_credentials]
username_env = "PPM_USERNAME"
password_env = "PPM_PASSWORD"

[servers.dev-ppm]
url = "https://dev.ppm.example.com"
env_type = "dev"

[servers.test-ppm]
url = "https://test.ppm.example.com"
env_type = "test"

[servers.prod-ppm]
url = "https://ppm.example.com"
env_type = "prod"

[object_store]
bucket = "ppm-archives"
prefix = "promote"
program = "{root}/aws"
timeout_secs = 30

[ci.artifacts]
source = "directory"
directory = "{root}/artifacts"
"#;

/// Entity 999 fails to extract; a bundle of entity 998 fails to import.
const FAKE_KMIGRATOR: &str = r#"#!/bin/sh
log="{log}"
action=""; file=""; entity=""; ref=""; flags=""; i18n=""; refdata=""
while [ $# -gt 0 ]; do
  case "$1" in
    -action) action="$2"; shift ;;
    -filename) file="$2"; shift ;;
    -entityId) entity="$2"; shift ;;
    -referenceCode) ref="$2"; shift ;;
    -flags) flags="$2"; shift ;;
    -i18n) i18n="$2"; shift ;;
    -refdata) refdata="$2"; shift ;;
  esac
  shift
done
case "$action" in
  Bundle)
    if [ "$entity" = "999" ]; then echo "entity not found" >&2; exit 1; fi
    echo "extract $entity $ref" >> "$log"
    printf '<bundle entity="%s" ref="%s"/>' "$entity" "$ref" > "$file"
    ;;
  import)
    case "$(cat "$file")" in
      *'entity="998"'*) echo "import rejected: locked entity" >&2; exit 3 ;;
    esac
    echo "import $flags $i18n $refdata $(basename "$file") $(cat "$file")" >> "$log"
    echo "Import completed"
    ;;
esac
"#;

const FAKE_AWS: &str = r#"#!/bin/sh
root="{root}"
while [ $# -gt 0 ]; do
  case "$1" in
    --endpoint-url|--region) shift 2 ;;
    s3) shift; break ;;
    *) shift ;;
  esac
done
cmd="$1"; shift
to_path() { echo "$root/${1#s3://}"; }
case "$cmd" in
  cp)
    src="$1"; dst="$2"
    case "$src" in
      s3://*)
        src=$(to_path "$src")
        if [ ! -f "$src" ]; then
          echo "fatal error: An error occurred (404) when calling the HeadObject operation: Not Found" >&2
          exit 1
        fi
        ;;
    esac
    case "$dst" in s3://*) dst=$(to_path "$dst"); mkdir -p "$(dirname "$dst")" ;; esac
    cp "$src" "$dst"
    ;;
  rm)
    rm -f "$(to_path "$1")"
    ;;
  ls)
    base=$(to_path "$1")
    dir="${base%/*}"
    [ -d "$dir" ] || exit 1
    find "$dir" -type f | while read -r f; do
      case "$f" in "$base"*) rel="${f#$root/}"; echo "2026-01-01 00:00:00 $(wc -c < "$f") ${rel#*/}" ;; esac
    done
    ;;
esac
"#;
