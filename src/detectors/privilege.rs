use std::net::IpAddr;

use crate::config::PrivilegePolicy;
use crate::core::error::TriageError;
use crate::core::types::{Alert, LogRecord, Signal, ThreatType, UserProfile};
use crate::detectors::{build_alert, Detector};

/// CIDR block, e.g. `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn parse(value: &str) -> Option<Self> {
        let (addr, prefix) = match value.split_once('/') {
            Some((a, p)) => (a.trim().parse::<IpAddr>().ok()?, p.trim().parse::<u8>().ok()?),
            None => {
                let addr = value.trim().parse::<IpAddr>().ok()?;
                let full = if addr.is_ipv4() { 32 } else { 128 };
                (addr, full)
            }
        };
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return None;
        }
        Some(Self { addr, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

/// Attempts to gain elevated access: unapproved role changes, direct ACL
/// writes, service credentials used off-network, admin commands, IAM widening.
pub struct PrivilegeEscalationDetector {
    policy: PrivilegePolicy,
    internal: Vec<IpNetwork>,
}

impl PrivilegeEscalationDetector {
    pub fn new(policy: PrivilegePolicy) -> Result<Self, TriageError> {
        let internal = policy
            .internal_networks
            .iter()
            .map(|n| {
                IpNetwork::parse(n)
                    .ok_or_else(|| TriageError::Config(format!("invalid internal network '{}'", n)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { policy, internal })
    }

    fn is_internal(&self, ip: &str) -> Option<bool> {
        let ip: IpAddr = ip.trim().parse().ok()?;
        Some(self.internal.iter().any(|n| n.contains(ip)))
    }

    fn unauthorized_role_changes(&self, logs: &[LogRecord]) -> Vec<Signal> {
        logs.iter()
            .filter(|l| l.str_field("action") == Some("role_change"))
            .filter(|l| l.str_field("approval_ticket").is_none())
            .map(|l| {
                Signal::new(
                    "unauthorized_role_change",
                    format!(
                        "{} -> {}",
                        l.str_field("old_role").unwrap_or("unknown"),
                        l.str_field("new_role").unwrap_or("unknown")
                    ),
                    self.policy.weights.unauthorized_role_change,
                    "Role modified without approval ticket",
                )
            })
            .collect()
    }

    fn direct_permission_modification(&self, logs: &[LogRecord]) -> Option<Signal> {
        let count = logs
            .iter()
            .filter_map(|l| l.str_field("action"))
            .filter(|a| self.policy.permission_actions.iter().any(|p| p == a))
            .count();
        if count == 0 {
            return None;
        }
        Some(Signal::new(
            "direct_permission_modification",
            count,
            self.policy.weights.direct_permission_modification,
            format!("{} direct permission changes detected", count),
        ))
    }

    fn service_account_misuse(&self, logs: &[LogRecord]) -> Option<Signal> {
        let prefix = self.policy.service_account_prefix.as_str();
        let (user, ip) = logs.iter().find_map(|l| {
            let user = l.str_field("user_id").filter(|u| u.starts_with(prefix))?;
            let ip = l.str_field("ip")?;
            match self.is_internal(ip) {
                Some(false) => Some((user, ip)),
                _ => None,
            }
        })?;
        Some(Signal::new(
            "service_account_misuse",
            format!("{} from IP {}", user, ip),
            self.policy.weights.service_account_misuse,
            "Service account accessed from external IP",
        ))
    }

    fn unauthorized_admin_execution(
        &self,
        logs: &[LogRecord],
        profile: Option<&UserProfile>,
    ) -> Option<Signal> {
        let role = profile?.role.as_deref()?;
        if self.policy.privileged_roles.iter().any(|r| r == role) {
            return None;
        }
        let hit = logs.iter().find(|l| {
            l.str_field("command").map_or(false, |c| c.starts_with("sudo"))
                || l.str_field("action") == Some("execute_admin_command")
        })?;
        let command = hit.str_field("command").unwrap_or("execute_admin_command");
        Some(Signal::new(
            "unauthorized_admin_execution",
            command,
            self.policy.weights.unauthorized_admin_execution,
            format!("Role '{}' executing: {}", role, command),
        ))
    }

    fn iam_privilege_expansion(&self, logs: &[LogRecord]) -> Option<Signal> {
        let change = logs.iter().find(|l| {
            l.str_field("action") == Some("update_iam_policy")
                && l.str_field("scope_change") == Some("expanded")
        })?;
        Some(Signal::new(
            "iam_privilege_expansion",
            change.str_field("policy_name").unwrap_or("unknown"),
            self.policy.weights.iam_privilege_expansion,
            "IAM policy modified to expand access scope",
        ))
    }
}

impl Detector for PrivilegeEscalationDetector {
    fn name(&self) -> &'static str {
        "privilege_escalation"
    }

    fn threat_type(&self) -> ThreatType {
        ThreatType::PrivilegeEscalation
    }

    fn detect(
        &self,
        logs: &[LogRecord],
        profile: Option<&UserProfile>,
    ) -> Result<Option<Alert>, TriageError> {
        if logs.is_empty() {
            return Ok(None);
        }

        let mut signals = self.unauthorized_role_changes(logs);
        signals.extend(
            [
                self.direct_permission_modification(logs),
                self.service_account_misuse(logs),
                self.unauthorized_admin_execution(logs, profile),
                self.iam_privilege_expansion(logs),
            ]
            .into_iter()
            .flatten(),
        );

        Ok(build_alert(
            ThreatType::PrivilegeEscalation,
            &self.policy.severity,
            signals,
            logs,
        ))
    }
}
