//! TCP keepalive configuration for accepted sockets.
//!
//! Applied once, right after accept and before the connection is activated.
//! Each option is set on its own so a zero value leaves the OS default in place.

use std::io;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::config::KeepAliveConfig;

/// A keepalive socket option could not be applied.
#[derive(Debug, thiserror::Error)]
#[error("failed to set {option}: {source}")]
pub struct KeepAliveError {
    /// Name of the option that failed, e.g. `TCP_KEEPIDLE`.
    pub option: &'static str,
    #[source]
    pub source: io::Error,
}

fn failed(option: &'static str) -> impl FnOnce(io::Error) -> KeepAliveError {
    move |source| KeepAliveError { option, source }
}

/// Apply `config` to `stream`.
///
/// Disabling keepalive skips the remaining options, since setting them would
/// switch it back on.
pub fn configure(stream: &TcpStream, config: &KeepAliveConfig) -> Result<(), KeepAliveError> {
    let sock = SockRef::from(stream);

    sock.set_keepalive(config.enabled).map_err(failed("SO_KEEPALIVE"))?;
    if !config.enabled {
        return Ok(());
    }

    if config.idle_secs != 0 {
        let idle = TcpKeepalive::new().with_time(Duration::from_secs(config.idle_secs));
        sock.set_tcp_keepalive(&idle).map_err(failed("TCP_KEEPIDLE"))?;
    }

    if config.count != 0 {
        set_count(&sock, config.count).map_err(failed("TCP_KEEPCNT"))?;
    }

    if config.interval_secs != 0 {
        let interval =
            TcpKeepalive::new().with_interval(Duration::from_secs(config.interval_secs));
        sock.set_tcp_keepalive(&interval).map_err(failed("TCP_KEEPINTVL"))?;
    }

    Ok(())
}

#[cfg(not(windows))]
fn set_count(sock: &SockRef<'_>, count: u32) -> io::Result<()> {
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_retries(count))
}

// Windows fixes the probe count; leave it at the OS default.
#[cfg(windows)]
fn set_count(_sock: &SockRef<'_>, count: u32) -> io::Result<()> {
    tracing::warn!(count, "TCP_KEEPCNT is not configurable on this platform, skipping");
    Ok(())
}
