//! Bootstrap entry sequence
//!
//! Order matters: the heartbeat registration comes before payload lookup so
//! that even a misconfigured child is tethered to its parent and cannot
//! outlive it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use shared::{process_error, process_info, process_warn};
use shared::{modpath, ProcessTag, ENV_MAX_RUNTIME, ENV_MODULE_PATH, EXIT_MAX_RUNTIME};

use crate::error::BootstrapError;
use crate::registry::PayloadRegistry;

/// The child-side argument contract: options injected by the launcher, then
/// the heartbeat port, the payload name, and the payload's own arguments.
#[derive(Parser, Debug)]
#[command(name = "linked-child")]
#[command(about = "Heartbeat-linked child bootstrap")]
pub struct BootArgs {
    /// Manifest file carrying the module path list
    #[arg(long)]
    pub module_path: Option<PathBuf>,

    /// KEY=VALUE pairs exported to the payload's environment
    #[arg(long = "define", value_name = "KEY=VALUE")]
    pub defines: Vec<String>,

    /// Port of the parent's heartbeat server
    pub heartbeat_port: u16,

    /// Registered payload name
    pub payload: String,

    /// Arguments handed to the payload
    #[arg(trailing_var_arg = true)]
    pub payload_args: Vec<String>,
}

/// Parse the command line and run the bootstrap sequence.
pub async fn boot(registry: PayloadRegistry) -> anyhow::Result<()> {
    boot_with_args(registry, BootArgs::parse()).await
}

pub async fn boot_with_args(registry: PayloadRegistry, args: BootArgs) -> anyhow::Result<()> {
    let tag = ProcessTag::Child(args.payload.clone());
    shared::logging::init_tracing(&tag, None);

    apply_defines(&args.defines)?;
    surface_module_path(&tag, args.module_path.as_deref()).await?;

    // The tether first: from here on, a dead parent means a dead child.
    heartbeat::service::register(args.heartbeat_port, &args.payload);

    arm_max_runtime_timer();

    let Some(entry) = registry.resolve(&args.payload) else {
        process_error!(tag, "unable to locate payload: {}", args.payload);
        return Err(BootstrapError::UnknownPayload {
            name: args.payload.clone(),
            registered: registry.names(),
        }
        .into());
    };

    process_info!(tag, "Handing off to payload [{}]", args.payload);
    entry(args.payload_args).await
}

/// Export `KEY=VALUE` defines so the payload can observe them.
fn apply_defines(defines: &[String]) -> Result<(), BootstrapError> {
    for entry in defines {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| BootstrapError::InvalidDefine {
                entry: entry.clone(),
            })?;
        std::env::set_var(key, value);
    }
    Ok(())
}

/// Turn the manifest back into a path list the payload can read from its
/// environment.
async fn surface_module_path(
    tag: &ProcessTag,
    manifest: Option<&std::path::Path>,
) -> Result<(), BootstrapError> {
    let Some(manifest) = manifest else {
        return Ok(());
    };
    let contents = tokio::fs::read_to_string(manifest).await.map_err(|err| {
        BootstrapError::UnreadableManifest {
            path: manifest.display().to_string(),
            source: err,
        }
    })?;
    match modpath::parse_manifest(&contents) {
        Ok(elements) => {
            if let Ok(joined) = std::env::join_paths(&elements) {
                std::env::set_var(ENV_MODULE_PATH, joined);
            }
        }
        Err(err) => {
            process_warn!(tag, "Ignoring module-path manifest: {}", err);
        }
    }
    Ok(())
}

/// Maximum runtime in seconds from the launcher-injected environment; 0
/// when unset, unparsable, or disabled.
pub fn max_runtime() -> u64 {
    std::env::var(ENV_MAX_RUNTIME)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn arm_max_runtime_timer() {
    let seconds = max_runtime();
    if seconds == 0 {
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        eprintln!("Max runtime hit ({seconds}s). Force exit");
        std::process::exit(EXIT_MAX_RUNTIME);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_contract_parses() {
        let args = BootArgs::try_parse_from([
            "linked-child",
            "--module-path",
            "/work/module-path-1.mf",
            "--define",
            "ljpt.foo=myprop",
            "--define",
            "other=1",
            "45123",
            "echo-stdin",
            "tail",
            "args",
        ])
        .unwrap();

        assert_eq!(args.module_path, Some(PathBuf::from("/work/module-path-1.mf")));
        assert_eq!(args.defines, vec!["ljpt.foo=myprop", "other=1"]);
        assert_eq!(args.heartbeat_port, 45123);
        assert_eq!(args.payload, "echo-stdin");
        assert_eq!(args.payload_args, vec!["tail", "args"]);
    }

    #[test]
    fn positionals_are_required() {
        assert!(BootArgs::try_parse_from(["linked-child", "45123"]).is_err());
        assert!(BootArgs::try_parse_from(["linked-child"]).is_err());
    }

    #[test]
    fn defines_are_exported() {
        apply_defines(&["BOOTSTRAP_TEST_DEFINE=set".to_string()]).unwrap();
        assert_eq!(std::env::var("BOOTSTRAP_TEST_DEFINE").unwrap(), "set");
        std::env::remove_var("BOOTSTRAP_TEST_DEFINE");

        let err = apply_defines(&["missing-equals".to_string()]).unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidDefine { .. }));
    }
}
