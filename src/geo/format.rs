use super::types::{DbFormat, GeoResult, PRIVATE_NETWORK};

/// Token ip2region data places in the last field of private-network ranges.
const PRIVATE_NETWORK_MARKER: &str = "内网IP";

/// Parse a `|`-separated ip2region region string according to `format`.
pub fn parse_region(region: &str, format: DbFormat) -> GeoResult {
    if region.is_empty() {
        return GeoResult::default();
    }

    let fields: Vec<&str> = region.split('|').collect();
    let field = |index: usize| -> String {
        match fields.get(index).map(|f| f.trim()) {
            Some(value) if !value.is_empty() && value != "0" => value.to_string(),
            _ => String::new(),
        }
    };

    let mut result = GeoResult::default();
    match format {
        DbFormat::Legacy => {
            result.country = field(0);
            result.region = field(1);
            result.province = field(2);
            result.city = field(3);
            result.isp = field(4);
        }
        DbFormat::OpenSource | DbFormat::Compact => {
            result.country = field(0);
            result.province = field(1);
            result.city = field(2);
            result.isp = field(3);
        }
        DbFormat::Full => {
            result.region = field(0);
            result.country = field(1);
            result.province = field(2);
            result.city = field(3);
            result.district = field(4);
            result.isp = field(5);
        }
        DbFormat::Standard => {
            result.country = field(0);
            result.province = field(1);
            result.city = field(2);
            result.district = field(3);
            result.isp = field(4);
        }
    }

    if fields
        .last()
        .is_some_and(|last| last.contains(PRIVATE_NETWORK_MARKER))
    {
        result.country = PRIVATE_NETWORK.to_string();
        result.province = PRIVATE_NETWORK.to_string();
        result.city = PRIVATE_NETWORK.to_string();
        result.region.clear();
        result.isp.clear();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_format() {
        let result = parse_region("中国|0|浙江省|杭州市|电信", DbFormat::Legacy);
        assert_eq!(result.country, "中国");
        assert_eq!(result.region, "");
        assert_eq!(result.province, "浙江省");
        assert_eq!(result.city, "杭州市");
        assert_eq!(result.isp, "电信");
        assert_eq!(result.district, "");
    }

    #[test]
    fn test_full_format_has_continent_and_district() {
        let result = parse_region("亚洲|中国|广东省|深圳市|南山区|联通|CN", DbFormat::Full);
        assert_eq!(result.region, "亚洲");
        assert_eq!(result.country, "中国");
        assert_eq!(result.district, "南山区");
        assert_eq!(result.isp, "联通");
    }

    #[test]
    fn test_standard_and_compact_formats() {
        let standard = parse_region("中国|北京|北京市|海淀区|移动|CN", DbFormat::Standard);
        assert_eq!(standard.district, "海淀区");
        assert_eq!(standard.isp, "移动");

        let compact = parse_region("中国|北京|北京市|移动|CN", DbFormat::Compact);
        assert_eq!(compact.city, "北京市");
        assert_eq!(compact.isp, "移动");
        assert_eq!(compact.district, "");
    }

    #[test]
    fn test_short_region_leaves_missing_fields_empty() {
        let result = parse_region("United States", DbFormat::OpenSource);
        assert_eq!(result.country, "United States");
        assert_eq!(result.province, "");
        assert_eq!(result.isp, "");
    }

    #[test]
    fn test_private_network_marker_overrides_location() {
        let result = parse_region("0|0|0|内网IP|内网IP", DbFormat::Legacy);
        assert_eq!(result.country, PRIVATE_NETWORK);
        assert_eq!(result.province, PRIVATE_NETWORK);
        assert_eq!(result.city, PRIVATE_NETWORK);
        assert_eq!(result.isp, "");
        assert_eq!(result.region, "");
    }

    #[test]
    fn test_empty_region() {
        assert_eq!(parse_region("", DbFormat::Full), GeoResult::default());
    }
}
