//! `tc netem` command builder.
//!
//! Builds `tc qdisc` commands that install a profile's bandwidth cap,
//! delay and loss as a root netem qdisc, remove it again, and probe
//! what is currently installed.
//! Requires `iproute2` in the container and `NET_ADMIN` capability.

use bench_types::NetworkConditionProfile;
use std::time::Duration;

/// A `tc qdisc add ... netem` invocation for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetemCommand {
    interface: String,
    delay: Duration,
    loss_ppm: u32,
    rate_bps: u64,
    limit: Option<u32>,
}

impl NetemCommand {
    /// Command installing `profile` on `interface`.
    ///
    /// Delay and loss are always emitted, so a baseline profile still
    /// installs a (no-op) netem qdisc. `rate` is omitted when uncapped.
    pub fn for_profile(interface: &str, profile: &NetworkConditionProfile) -> Self {
        Self {
            interface: interface.to_string(),
            delay: profile.delay(),
            loss_ppm: profile.loss_rate().ppm(),
            rate_bps: profile.bandwidth().bits_per_second(),
            limit: None,
        }
    }

    /// Set the netem queue limit in packets.
    pub fn limit(mut self, packets: u32) -> Self {
        self.limit = Some(packets);
        self
    }

    /// Interface the command targets.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Build the `tc qdisc add` command arguments.
    ///
    /// Returns args for: `tc qdisc add dev <iface> root netem [limit N] delay D loss P% [rate R]`
    pub fn to_tc_add_args(&self) -> Vec<String> {
        let mut args = vec![
            "qdisc".into(),
            "add".into(),
            "dev".into(),
            self.interface.clone(),
            "root".into(),
            "netem".into(),
        ];

        if let Some(limit) = self.limit {
            args.push("limit".into());
            args.push(limit.to_string());
        }

        args.push("delay".into());
        args.push(format_tc_time(self.delay));

        args.push("loss".into());
        args.push(format!("{}%", self.loss_ppm as f64 / 10_000.0));

        if self.rate_bps > 0 {
            args.push("rate".into());
            args.push(format_tc_rate(self.rate_bps));
        }

        args
    }

    /// Build the full `tc` command string (for logging/debugging).
    pub fn to_tc_command(&self) -> String {
        format!("tc {}", self.to_tc_add_args().join(" "))
    }
}

/// Args for: `tc qdisc del dev <iface> root`
pub fn tc_del_args(interface: &str) -> Vec<String> {
    vec![
        "qdisc".into(),
        "del".into(),
        "dev".into(),
        interface.to_string(),
        "root".into(),
    ]
}

/// Args for: `tc qdisc show dev <iface>`
pub fn tc_show_args(interface: &str) -> Vec<String> {
    vec![
        "qdisc".into(),
        "show".into(),
        "dev".into(),
        interface.to_string(),
    ]
}

/// Root qdisc state of an interface, as reported by `tc qdisc show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QdiscState {
    /// Only the kernel default root qdisc (handle `0:`) is present.
    Clean,
    /// A configured root qdisc is installed; holds its description line.
    Installed(String),
}

/// Parse `tc qdisc show dev <iface>` output.
///
/// The kernel default root qdisc (`noqueue`, `pfifo_fast`, `mq`, ...) always
/// has handle `0:`; anything installed with `tc qdisc add` gets a real handle.
pub fn parse_qdisc_show(output: &str) -> QdiscState {
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"qdisc") || !tokens.contains(&"root") {
            continue;
        }
        if tokens.get(2) != Some(&"0:") {
            return QdiscState::Installed(line.trim().to_string());
        }
    }
    QdiscState::Clean
}

fn format_tc_time(d: Duration) -> String {
    let micros = d.as_micros();
    if micros % 1_000 == 0 {
        format!("{}ms", micros / 1_000)
    } else {
        format!("{}us", micros)
    }
}

fn format_tc_rate(bps: u64) -> String {
    if bps % 1_000 == 0 {
        format!("{}kbit", bps / 1_000)
    } else {
        format!("{}bit", bps)
    }
}
