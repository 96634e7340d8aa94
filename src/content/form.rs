/// Parse an `application/x-www-form-urlencoded` body into ordered pairs.
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (unescape(name), unescape(value))
        })
        .collect()
}

fn unescape(component: &str) -> String {
    let spaced = component.replace('+', " ");
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Whether a `Content-Type` value announces a urlencoded form.
pub fn is_form_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form() {
        let pairs = parse_form("name=J%C3%B6rg+Smith&empty=&flag&&q=%3Cscript%3E");
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "Jörg Smith".to_string()),
                ("empty".to_string(), String::new()),
                ("flag".to_string(), String::new()),
                ("q".to_string(), "<script>".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_escapes_kept() {
        assert_eq!(
            parse_form("a=%zz%"),
            vec![("a".to_string(), "%zz%".to_string())]
        );
    }

    #[test]
    fn test_form_content_type() {
        assert!(is_form_content_type("application/x-www-form-urlencoded; charset=UTF-8"));
        assert!(!is_form_content_type("multipart/form-data; boundary=x"));
    }
}
