use serde::Serialize;
use std::fmt;

use crate::geo::GeoResult;

/// Runtime value of a rule expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// Addressable fields of [`RequestFact`], named in rules by their
/// upper-case identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactField {
    SrcIp,
    NetSrcIp,
    Host,
    Url,
    Method,
    Scheme,
    Referer,
    UserAgent,
    Cookies,
    Header,
    Body,
    PostForm,
    ContentLength,
    StatusCode,
    Country,
    Province,
    City,
    Isp,
    Region,
    District,
    RiskLevel,
    ExecResult,
}

impl FactField {
    pub const ALL: [FactField; 22] = [
        FactField::SrcIp,
        FactField::NetSrcIp,
        FactField::Host,
        FactField::Url,
        FactField::Method,
        FactField::Scheme,
        FactField::Referer,
        FactField::UserAgent,
        FactField::Cookies,
        FactField::Header,
        FactField::Body,
        FactField::PostForm,
        FactField::ContentLength,
        FactField::StatusCode,
        FactField::Country,
        FactField::Province,
        FactField::City,
        FactField::Isp,
        FactField::Region,
        FactField::District,
        FactField::RiskLevel,
        FactField::ExecResult,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FactField::SrcIp => "SRC_IP",
            FactField::NetSrcIp => "NET_SRC_IP",
            FactField::Host => "HOST",
            FactField::Url => "URL",
            FactField::Method => "METHOD",
            FactField::Scheme => "SCHEME",
            FactField::Referer => "REFERER",
            FactField::UserAgent => "USER_AGENT",
            FactField::Cookies => "COOKIES",
            FactField::Header => "HEADER",
            FactField::Body => "BODY",
            FactField::PostForm => "POST_FORM",
            FactField::ContentLength => "CONTENT_LENGTH",
            FactField::StatusCode => "STATUS_CODE",
            FactField::Country => "COUNTRY",
            FactField::Province => "PROVINCE",
            FactField::City => "CITY",
            FactField::Isp => "ISP",
            FactField::Region => "REGION",
            FactField::District => "DISTRICT",
            FactField::RiskLevel => "RISK_LEVEL",
            FactField::ExecResult => "EXEC_RESULT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FactField::ContentLength
                | FactField::StatusCode
                | FactField::RiskLevel
                | FactField::ExecResult
        )
    }
}

/// Per-request record the detectors and rules read and write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RequestFact {
    pub src_ip: String,
    pub net_src_ip: String,
    pub host: String,
    pub url: String,
    pub method: String,
    pub scheme: String,
    pub referer: String,
    pub user_agent: String,
    pub cookies: String,
    pub header: String,
    pub body: String,
    pub post_form: String,
    pub content_length: i64,
    pub status_code: i64,
    pub country: String,
    pub province: String,
    pub city: String,
    pub isp: String,
    pub region: String,
    pub district: String,
    pub risk_level: i64,
    pub exec_result: i64,
}

impl RequestFact {
    fn str_field(&self, field: FactField) -> Option<&String> {
        let value = match field {
            FactField::SrcIp => &self.src_ip,
            FactField::NetSrcIp => &self.net_src_ip,
            FactField::Host => &self.host,
            FactField::Url => &self.url,
            FactField::Method => &self.method,
            FactField::Scheme => &self.scheme,
            FactField::Referer => &self.referer,
            FactField::UserAgent => &self.user_agent,
            FactField::Cookies => &self.cookies,
            FactField::Header => &self.header,
            FactField::Body => &self.body,
            FactField::PostForm => &self.post_form,
            FactField::Country => &self.country,
            FactField::Province => &self.province,
            FactField::City => &self.city,
            FactField::Isp => &self.isp,
            FactField::Region => &self.region,
            FactField::District => &self.district,
            _ => return None,
        };
        Some(value)
    }

    fn str_field_mut(&mut self, field: FactField) -> Option<&mut String> {
        let value = match field {
            FactField::SrcIp => &mut self.src_ip,
            FactField::NetSrcIp => &mut self.net_src_ip,
            FactField::Host => &mut self.host,
            FactField::Url => &mut self.url,
            FactField::Method => &mut self.method,
            FactField::Scheme => &mut self.scheme,
            FactField::Referer => &mut self.referer,
            FactField::UserAgent => &mut self.user_agent,
            FactField::Cookies => &mut self.cookies,
            FactField::Header => &mut self.header,
            FactField::Body => &mut self.body,
            FactField::PostForm => &mut self.post_form,
            FactField::Country => &mut self.country,
            FactField::Province => &mut self.province,
            FactField::City => &mut self.city,
            FactField::Isp => &mut self.isp,
            FactField::Region => &mut self.region,
            FactField::District => &mut self.district,
            _ => return None,
        };
        Some(value)
    }

    fn int_field_mut(&mut self, field: FactField) -> Option<&mut i64> {
        match field {
            FactField::ContentLength => Some(&mut self.content_length),
            FactField::StatusCode => Some(&mut self.status_code),
            FactField::RiskLevel => Some(&mut self.risk_level),
            FactField::ExecResult => Some(&mut self.exec_result),
            _ => None,
        }
    }

    pub fn get(&self, field: FactField) -> Value {
        if let Some(s) = self.str_field(field) {
            return Value::Str(s.clone());
        }
        match field {
            FactField::ContentLength => Value::Int(self.content_length),
            FactField::StatusCode => Value::Int(self.status_code),
            FactField::RiskLevel => Value::Int(self.risk_level),
            FactField::ExecResult => Value::Int(self.exec_result),
            _ => Value::Nil,
        }
    }

    /// Assign `value` to `field`. Integer fields accept integers (and
    /// floats, truncated); string fields accept any scalar rendered as text.
    pub fn set(&mut self, field: FactField, value: Value) -> Result<(), String> {
        if field.is_integer() {
            let n = match value {
                Value::Int(n) => n,
                Value::Float(x) => x as i64,
                other => {
                    return Err(format!(
                        "cannot assign {} to integer field {}",
                        other.type_name(),
                        field.name()
                    ))
                }
            };
            if let Some(slot) = self.int_field_mut(field) {
                *slot = n;
            }
            return Ok(());
        }

        let text = match value {
            Value::Nil => String::new(),
            Value::Str(s) => s,
            other => other.to_string(),
        };
        if let Some(slot) = self.str_field_mut(field) {
            *slot = text;
        }
        Ok(())
    }

    /// Copy location fields from a geolocation answer.
    pub fn apply_geo(&mut self, geo: &GeoResult) {
        self.country = geo.country.clone();
        self.province = geo.province.clone();
        self.city = geo.city.clone();
        self.isp = geo.isp.clone();
        self.region = geo.region.clone();
        self.district = geo.district.clone();
    }
}
