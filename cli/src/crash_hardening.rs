use anyhow::{Context, Result};
use std::env;
#[cfg(unix)]
use std::io;

const INGEST_ALLOW_COREDUMPS: &str = "INGEST_ALLOW_COREDUMPS";

pub fn apply() -> Result<()> {
    if coredumps_allowed_by_override() {
        tracing::warn!(
            env_var = INGEST_ALLOW_COREDUMPS,
            "Crash dump hardening disabled by environment override"
        );
        return Ok(());
    }

    apply_platform_hardening().context("failed to apply crash dump hardening")?;
    tracing::info!("Crash dump hardening enabled");
    Ok(())
}

fn coredumps_allowed_by_override() -> bool {
    match env::var(INGEST_ALLOW_COREDUMPS) {
        Ok(raw) => is_truthy(raw.as_str()),
        Err(_) => false,
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(unix)]
fn apply_platform_hardening() -> Result<()> {
    set_rlimit_core_zero().context("setrlimit(RLIMIT_CORE=0) failed")?;

    #[cfg(target_os = "linux")]
    {
        set_linux_dumpable_zero().context("prctl(PR_SET_DUMPABLE=0) failed")?;
    }

    Ok(())
}

#[cfg(unix)]
fn set_rlimit_core_zero() -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn set_linux_dumpable_zero() -> io::Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn apply_platform_hardening() -> Result<()> {
    Ok(())
}
