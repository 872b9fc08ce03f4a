//! Artifact policy resolution: turns a run's configured profiles into a
//! concrete set of managed roots and environment overrides, and snapshots
//! the result into the checkpoint envelope so a resumed run doesn't
//! re-derive it from scratch.

use std::collections::HashMap;
use std::path::Path;

use attractor_types::{Checkpoint, ResolvedArtifactPolicy, Result};

/// Built-in profile table: profile name -> (managed-root keys, default env
/// overrides). Real deployments would load this from a config file; the
/// built-ins cover the common cases spec §4.7 names.
fn profile_table() -> HashMap<&'static str, (&'static [&'static str], &'static [(&'static str, &'static str)])> {
    let mut table = HashMap::new();
    table.insert("default", (&["artifacts"][..], &[][..]));
    table.insert(
        "build",
        (&["build", "dist"][..], &[("CI", "false")][..]),
    );
    table.insert("logs", (&["logs"][..], &[][..]));
    table
}

/// Resolve a fresh artifact policy from the run's configured profiles.
/// Managed roots are created under `{logs_root}/policy-managed-roots/{key}`.
/// Env overrides merge in profile order with the OS environment winning over
/// any profile default.
pub fn resolve(profiles: &[String], logs_root: &Path) -> ResolvedArtifactPolicy {
    let table = profile_table();
    let mut managed_roots = HashMap::new();
    let mut env_vars = HashMap::new();
    let mut resolved_profiles = Vec::new();

    let active = if profiles.is_empty() {
        vec!["default".to_string()]
    } else {
        profiles.to_vec()
    };

    for profile in &active {
        let Some((keys, env_defaults)) = table.get(profile.as_str()) else {
            continue;
        };
        resolved_profiles.push(profile.clone());
        for key in *keys {
            let root = logs_root.join("policy-managed-roots").join(key);
            managed_roots.insert(key.to_string(), root);
        }
        for (k, v) in *env_defaults {
            env_vars.insert(k.to_string(), v.to_string());
        }
    }

    // OS environment wins over profile defaults for any key a profile set.
    for key in env_vars.clone().keys() {
        if let Ok(os_val) = std::env::var(key) {
            env_vars.insert(key.clone(), os_val);
        }
    }

    ResolvedArtifactPolicy {
        profiles: resolved_profiles,
        managed_roots,
        env_vars,
        checkpoint_exclude_globs: vec!["**/.git/**".to_string(), "**/target/**".to_string()],
    }
}

/// Resolve the artifact policy for a run, restoring it from the checkpoint's
/// `extra["artifact_policy_resolved"]` envelope when present instead of
/// re-deriving it, so a resume sees exactly the roots the original run saw.
pub fn resolve_or_restore(
    checkpoint: Option<&Checkpoint>,
    profiles: &[String],
    logs_root: &Path,
) -> Result<ResolvedArtifactPolicy> {
    if let Some(cp) = checkpoint {
        if let Some(envelope) = cp.extra.get("artifact_policy_resolved") {
            if let Some(policy) = envelope.get("policy") {
                return Ok(serde_json::from_value(policy.clone())?);
            }
        }
    }
    Ok(resolve(profiles, logs_root))
}

/// Build the checkpoint envelope value for a resolved policy, for storing in
/// `Checkpoint.extra["artifact_policy_resolved"]`.
pub fn to_checkpoint_envelope(policy: &ResolvedArtifactPolicy) -> serde_json::Value {
    serde_json::json!({ "version": 1, "policy": policy })
}
