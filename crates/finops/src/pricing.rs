//! Per-unit price heuristics.
//!
//! These are us-east-1 on-demand list prices. They are deliberately static:
//! estimates only need to rank findings, not reproduce an invoice.

/// Billing hours in a month.
pub const HOURS_PER_MONTH: f64 = 720.0;

/// EBS snapshot storage, per GiB-month.
pub const SNAPSHOT_GIB_MONTH: f64 = 0.05;

/// Elastic IP not attached to a running instance, per hour.
pub const IDLE_EIP_HOUR: f64 = 0.005;

/// NAT gateway, per hour (data processing excluded).
pub const NAT_GATEWAY_HOUR: f64 = 0.045;

/// Application/network/gateway load balancer, per hour.
pub const ELBV2_HOUR: f64 = 0.0225;

/// Classic load balancer, per hour.
pub const CLASSIC_ELB_HOUR: f64 = 0.025;

/// CloudWatch Logs archived storage, per GiB-month.
pub const LOG_STORAGE_GIB_MONTH: f64 = 0.03;

/// DynamoDB provisioned read capacity unit, per hour.
pub const DYNAMODB_RCU_HOUR: f64 = 0.000_13;

/// DynamoDB provisioned write capacity unit, per hour.
pub const DYNAMODB_WCU_HOUR: f64 = 0.000_65;

/// EKS control plane in standard support, per hour.
pub const EKS_STANDARD_HOUR: f64 = 0.10;

/// EKS control plane in extended support, per hour.
pub const EKS_EXTENDED_HOUR: f64 = 0.60;

/// Graviton (arm64) Lambda duration discount relative to x86.
pub const LAMBDA_ARM_DISCOUNT: f64 = 0.20;

/// EBS storage price per GiB-month for a volume type.
///
/// Unknown types are priced as `gp2`.
#[must_use]
pub fn ebs_gib_month(volume_type: &str) -> f64 {
    match volume_type {
        "gp3" => 0.08,
        "io1" | "io2" => 0.125,
        "st1" => 0.045,
        "sc1" => 0.015,
        "standard" => 0.05,
        _ => 0.10,
    }
}

/// Monthly cost of an hourly rate.
#[must_use]
pub fn monthly(hourly: f64) -> f64 {
    hourly * HOURS_PER_MONTH
}

/// Monthly storage cost of an EBS volume.
#[must_use]
pub fn ebs_volume_monthly(volume_type: &str, size_gib: u64) -> f64 {
    ebs_gib_month(volume_type) * as_f64(size_gib)
}

/// Monthly saving from moving a gp2 volume to gp3 at the same size.
#[must_use]
pub fn gp2_to_gp3_savings(size_gib: u64) -> f64 {
    (ebs_gib_month("gp2") - ebs_gib_month("gp3")) * as_f64(size_gib)
}

/// Monthly cost of DynamoDB provisioned capacity.
#[must_use]
pub fn dynamodb_provisioned_monthly(rcu: u64, wcu: u64) -> f64 {
    monthly(DYNAMODB_RCU_HOUR * as_f64(rcu) + DYNAMODB_WCU_HOUR * as_f64(wcu))
}

/// Monthly cost of a load balancer by its `Type` field.
#[must_use]
pub fn load_balancer_monthly(lb_type: &str) -> f64 {
    match lb_type {
        "classic" => monthly(CLASSIC_ELB_HOUR),
        _ => monthly(ELBV2_HOUR),
    }
}

/// Monthly premium of EKS extended support over standard support.
#[must_use]
pub fn eks_extended_support_premium() -> f64 {
    monthly(EKS_EXTENDED_HOUR - EKS_STANDARD_HOUR)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(units: u64) -> f64 {
    units as f64
}
