//! Predicates available to rules through the `RF` object.
//!
//! Every predicate is pure and total: input that cannot be parsed as an
//! address makes the predicate false instead of raising an error.

use ipnetwork::IpNetwork;
use std::net::IpAddr;

use super::fact::Value;

fn parse_ip(input: &str) -> Option<IpAddr> {
    input.parse().ok()
}

/// 16-byte form with IPv4 mapped into IPv6 space.
fn to16(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

pub fn ip_in_range(ip: &str, start: &str, end: &str) -> bool {
    let (Some(ip), Some(start), Some(end)) = (parse_ip(ip), parse_ip(start), parse_ip(end)) else {
        return false;
    };
    let ip = to16(ip);
    ip >= to16(start) && ip <= to16(end)
}

pub fn ip_in_cidr(ip: &str, cidr: &str) -> bool {
    let (Some(ip), Ok(network)) = (parse_ip(ip), cidr.parse::<IpNetwork>()) else {
        return false;
    };
    let ip = canonical(ip);
    match (network, ip) {
        (IpNetwork::V6(net), IpAddr::V4(v4)) => net.contains(v4.to_ipv6_mapped()),
        _ => network.contains(ip),
    }
}

/// Each spec is a CIDR (`/`), an inclusive `start-end` range (`-`), or a
/// literal address compared as trimmed text.
pub fn ip_in_ranges<S: AsRef<str>>(ip: &str, specs: &[S]) -> bool {
    specs.iter().any(|spec| {
        let spec = spec.as_ref();
        if spec.contains('/') {
            ip_in_cidr(ip, spec)
        } else if spec.contains('-') {
            let parts: Vec<&str> = spec.split('-').collect();
            parts.len() == 2 && ip_in_range(ip, parts[0].trim(), parts[1].trim())
        } else {
            ip == spec.trim()
        }
    })
}

pub fn ip_equals(a: &str, b: &str) -> bool {
    match (parse_ip(a), parse_ip(b)) {
        (Some(x), Some(y)) => to16(x) == to16(y),
        _ => a == b,
    }
}

pub fn is_in<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    list.iter().any(|item| item.as_ref() == value)
}

pub fn in_ignore_case<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    let value = value.to_lowercase();
    list.iter().any(|item| item.as_ref().to_lowercase() == value)
}

pub fn contains_any<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    list.iter().any(|item| value.contains(item.as_ref()))
}

pub fn contains_any_ignore_case<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    let value = value.to_lowercase();
    list.iter()
        .any(|item| value.contains(&item.as_ref().to_lowercase()))
}

/// False for an empty list.
pub fn contains_all<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    !list.is_empty() && list.iter().all(|item| value.contains(item.as_ref()))
}

pub fn starts_with_any<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    list.iter().any(|item| value.starts_with(item.as_ref()))
}

pub fn ends_with_any<S: AsRef<str>>(value: &str, list: &[S]) -> bool {
    list.iter().any(|item| value.ends_with(item.as_ref()))
}

pub fn int_in_range(value: i64, min: i64, max: i64) -> bool {
    value >= min && value <= max
}

pub fn int_in(value: i64, list: &[i64]) -> bool {
    list.contains(&value)
}

pub fn is_empty(value: &str) -> bool {
    value.is_empty()
}

/// Inclusive bounds on the character count.
pub fn length_between(value: &str, min: i64, max: i64) -> bool {
    let len = value.chars().count() as i64;
    len >= min && len <= max
}

fn str_arg<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a str, String> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s.as_str()),
        Some(other) => Err(format!(
            "{} argument {} must be a string, got {}",
            name,
            i + 1,
            other.type_name()
        )),
        None => Err(format!("{} is missing argument {}", name, i + 1)),
    }
}

fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64, String> {
    match args.get(i) {
        Some(Value::Int(n)) => Ok(*n),
        Some(other) => Err(format!(
            "{} argument {} must be an integer, got {}",
            name,
            i + 1,
            other.type_name()
        )),
        None => Err(format!("{} is missing argument {}", name, i + 1)),
    }
}

/// Closed set of callable predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    IpInRange,
    IpInCidr,
    IpInRanges,
    IpEquals,
    In,
    InIgnoreCase,
    ContainsAny,
    ContainsAnyIgnoreCase,
    ContainsAll,
    StartsWithAny,
    EndsWithAny,
    IntInRange,
    IntIn,
    Not,
    IsEmpty,
    IsNotEmpty,
    LengthBetween,
}

impl Predicate {
    pub fn from_name(name: &str) -> Option<Self> {
        let predicate = match name {
            "IPInRange" => Predicate::IpInRange,
            "IPInCIDR" => Predicate::IpInCidr,
            "IPInRanges" => Predicate::IpInRanges,
            "IPEquals" => Predicate::IpEquals,
            "In" => Predicate::In,
            "InIgnoreCase" => Predicate::InIgnoreCase,
            "ContainsAny" => Predicate::ContainsAny,
            "ContainsAnyIgnoreCase" => Predicate::ContainsAnyIgnoreCase,
            "ContainsAll" => Predicate::ContainsAll,
            "StartsWithAny" => Predicate::StartsWithAny,
            "EndsWithAny" => Predicate::EndsWithAny,
            "IntInRange" => Predicate::IntInRange,
            "IntIn" => Predicate::IntIn,
            "Not" => Predicate::Not,
            "IsEmpty" => Predicate::IsEmpty,
            "IsNotEmpty" => Predicate::IsNotEmpty,
            "LengthBetween" => Predicate::LengthBetween,
            _ => return None,
        };
        Some(predicate)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Predicate::IpInRange => "IPInRange",
            Predicate::IpInCidr => "IPInCIDR",
            Predicate::IpInRanges => "IPInRanges",
            Predicate::IpEquals => "IPEquals",
            Predicate::In => "In",
            Predicate::InIgnoreCase => "InIgnoreCase",
            Predicate::ContainsAny => "ContainsAny",
            Predicate::ContainsAnyIgnoreCase => "ContainsAnyIgnoreCase",
            Predicate::ContainsAll => "ContainsAll",
            Predicate::StartsWithAny => "StartsWithAny",
            Predicate::EndsWithAny => "EndsWithAny",
            Predicate::IntInRange => "IntInRange",
            Predicate::IntIn => "IntIn",
            Predicate::Not => "Not",
            Predicate::IsEmpty => "IsEmpty",
            Predicate::IsNotEmpty => "IsNotEmpty",
            Predicate::LengthBetween => "LengthBetween",
        }
    }

    /// Minimum argument count and maximum (None for variadic).
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Predicate::IpInRange | Predicate::IntInRange | Predicate::LengthBetween => (3, Some(3)),
            Predicate::IpInCidr | Predicate::IpEquals => (2, Some(2)),
            Predicate::Not | Predicate::IsEmpty | Predicate::IsNotEmpty => (1, Some(1)),
            _ => (1, None),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<bool, String> {
        let name = self.name();
        let str_arg = |i| str_arg(name, args, i);
        let int_arg = |i| int_arg(name, args, i);
        let str_rest = || (1..args.len()).map(str_arg).collect::<Result<Vec<_>, _>>();

        let result = match self {
            Predicate::IpInRange => ip_in_range(str_arg(0)?, str_arg(1)?, str_arg(2)?),
            Predicate::IpInCidr => ip_in_cidr(str_arg(0)?, str_arg(1)?),
            Predicate::IpInRanges => ip_in_ranges(str_arg(0)?, &str_rest()?),
            Predicate::IpEquals => ip_equals(str_arg(0)?, str_arg(1)?),
            Predicate::In => is_in(str_arg(0)?, &str_rest()?),
            Predicate::InIgnoreCase => in_ignore_case(str_arg(0)?, &str_rest()?),
            Predicate::ContainsAny => contains_any(str_arg(0)?, &str_rest()?),
            Predicate::ContainsAnyIgnoreCase => contains_any_ignore_case(str_arg(0)?, &str_rest()?),
            Predicate::ContainsAll => contains_all(str_arg(0)?, &str_rest()?),
            Predicate::StartsWithAny => starts_with_any(str_arg(0)?, &str_rest()?),
            Predicate::EndsWithAny => ends_with_any(str_arg(0)?, &str_rest()?),
            Predicate::IntInRange => int_in_range(int_arg(0)?, int_arg(1)?, int_arg(2)?),
            Predicate::IntIn => {
                let list = (1..args.len())
                    .map(int_arg)
                    .collect::<Result<Vec<_>, _>>()?;
                int_in(int_arg(0)?, &list)
            }
            Predicate::Not => match args.first() {
                Some(Value::Bool(b)) => !b,
                Some(other) => {
                    return Err(format!("Not expects a boolean, got {}", other.type_name()))
                }
                None => return Err("Not is missing argument 1".to_string()),
            },
            Predicate::IsEmpty => is_empty(str_arg(0)?),
            Predicate::IsNotEmpty => !is_empty(str_arg(0)?),
            Predicate::LengthBetween => length_between(str_arg(0)?, int_arg(1)?, int_arg(2)?),
        };
        Ok(result)
    }
}
