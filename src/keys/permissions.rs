// Key file access control
//
// ssh refuses private keys other users can read. On Unix both files end up
// owner read-only; on Windows the ACL is reset to a single read grant for the
// current user.

use crate::errors::{DevkitError, Result};
use std::path::Path;

#[cfg(unix)]
pub fn restrict_to_owner(private_key: &Path, public_key: &Path) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    for path in [private_key, public_key] {
        fs::set_permissions(path, fs::Permissions::from_mode(0o400)).map_err(|e| {
            DevkitError::Configuration(format!(
                "failed to set permissions on {}: {}",
                path.display(),
                e
            ))
        })?;
    }
    tracing::debug!(
        private_key = %private_key.display(),
        public_key = %public_key.display(),
        "Key files set to mode 0400"
    );
    Ok(())
}

#[cfg(windows)]
pub fn restrict_to_owner(private_key: &Path, _public_key: &Path) -> Result<()> {
    use std::process::{Command, Stdio};

    let whoami = Command::new("whoami")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| DevkitError::Configuration(format!("failed to run whoami: {}", e)))?;
    let user = String::from_utf8_lossy(&whoami.stdout).trim().to_string();
    if user.is_empty() {
        return Err(DevkitError::Configuration(
            "whoami returned no user name".to_string(),
        ));
    }

    let key = private_key.display().to_string();
    let grant = format!("{}:(R)", user);
    let steps: [&[&str]; 4] = [
        &[key.as_str(), "/Reset"],
        &[key.as_str(), "/Inheritance:r"],
        &[key.as_str(), "/Grant:r", grant.as_str()],
        // listing only, for the log
        &[key.as_str()],
    ];

    for args in steps {
        let output = Command::new("icacls.exe")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DevkitError::Configuration(format!("failed to run icacls.exe: {}", e)))?;
        let text = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            tracing::debug!("icacls.exe {}: {}", args.join(" "), text.trim());
        } else {
            tracing::warn!("icacls.exe {}: {}", args.join(" "), text.trim());
        }
    }
    Ok(())
}
