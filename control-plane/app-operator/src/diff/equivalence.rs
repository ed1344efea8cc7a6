//! Semantic comparison of container fields the API server rewrites on
//! storage. Quantities come back in canonical form (`0.5` is stored as
//! `500m`), and an absent `resources` block comes back as `{}`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::templates::env_var_with_defaults;

enum Scale {
    Mul(f64),
    Div(f64),
}

fn suffix_scale(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::Mul(1.0),
        "n" => Scale::Div(1e9),
        "u" => Scale::Div(1e6),
        "m" => Scale::Div(1e3),
        "k" => Scale::Mul(1e3),
        "M" => Scale::Mul(1e6),
        "G" => Scale::Mul(1e9),
        "T" => Scale::Mul(1e12),
        "P" => Scale::Mul(1e15),
        "E" => Scale::Mul(1e18),
        "Ki" => Scale::Mul(1024.0),
        "Mi" => Scale::Mul(1024f64.powi(2)),
        "Gi" => Scale::Mul(1024f64.powi(3)),
        "Ti" => Scale::Mul(1024f64.powi(4)),
        "Pi" => Scale::Mul(1024f64.powi(5)),
        "Ei" => Scale::Mul(1024f64.powi(6)),
        exp if exp.starts_with(['e', 'E']) => {
            let power: i32 = exp[1..].parse().ok()?;
            if power < 0 {
                Scale::Div(10f64.powi(-power))
            } else {
                Scale::Mul(10f64.powi(power))
            }
        }
        _ => return None,
    };
    Some(scale)
}

/// Numeric value of a quantity, or `None` when it does not parse.
pub fn quantity_value(q: &Quantity) -> Option<f64> {
    let text = q.0.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    match suffix_scale(suffix)? {
        Scale::Mul(f) => Some(number * f),
        Scale::Div(f) => Some(number / f),
    }
}

pub fn same_quantity(a: &Quantity, b: &Quantity) -> bool {
    match (quantity_value(a), quantity_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn same_quantities(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (a, b) = (a.unwrap_or(&empty), b.unwrap_or(&empty));
    a.len() == b.len()
        && a.iter()
            .all(|(k, q)| b.get(k).is_some_and(|other| same_quantity(q, other)))
}

/// `None` and `{}` are the same; quantities compare by value.
pub fn same_resources(
    a: Option<&ResourceRequirements>,
    b: Option<&ResourceRequirements>,
) -> bool {
    let empty = ResourceRequirements::default();
    let (a, b) = (a.unwrap_or(&empty), b.unwrap_or(&empty));
    same_quantities(a.limits.as_ref(), b.limits.as_ref())
        && same_quantities(a.requests.as_ref(), b.requests.as_ref())
        && a.claims.as_deref().unwrap_or_default() == b.claims.as_deref().unwrap_or_default()
}

/// Env lists compare after server defaulting; `None` equals an empty list.
pub fn same_env(a: Option<&[EnvVar]>, b: Option<&[EnvVar]>) -> bool {
    let (a, b) = (a.unwrap_or_default(), b.unwrap_or_default());
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| env_var_with_defaults(x) == env_var_with_defaults(y))
}
