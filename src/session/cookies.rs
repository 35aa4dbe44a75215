use std::collections::BTreeMap;

/// Process-lifetime cookie jar: name to value, last write wins.
///
/// Attributes such as `Expires` or `Path` are ignored. Cookies are never
/// expired by the jar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// Seeds a jar from a `Cookie` header style string (`a=1; b=2`).
    pub fn from_cookie_string(raw: &str) -> Self {
        let mut jar = Self::default();
        for pair in raw.split(';') {
            if let Some((name, value)) = split_pair(pair) {
                jar.cookies.insert(name, value);
            }
        }
        jar
    }

    /// Records one `Set-Cookie` header value.
    pub fn store_set_cookie(&mut self, header: &str) {
        let first = header.split(';').next().unwrap_or_default();
        if let Some((name, value)) = split_pair(first) {
            self.cookies.insert(name, value);
        }
    }

    /// Value for the `Cookie` request header, `None` when the jar is empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

fn split_pair(pair: &str) -> Option<(String, String)> {
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_set_cookie_wins() {
        let mut jar = CookieJar::default();
        jar.store_set_cookie("session=abc; Path=/; HttpOnly");
        jar.store_set_cookie("cart=1; Max-Age=0");
        jar.store_set_cookie("session=def; Path=/");
        assert_eq!(jar.get("session"), Some("def"));
        assert_eq!(jar.get("cart"), Some("1"));
        assert_eq!(jar.header_value().as_deref(), Some("cart=1; session=def"));
    }

    #[test]
    fn cookie_string_seeds_the_jar() {
        let jar = CookieJar::from_cookie_string(" a=1; b = x=y ;; =skip");
        assert_eq!(jar.len(), 2);
        assert_eq!(jar.get("b"), Some("x=y"));
    }

    #[test]
    fn empty_jar_sends_no_header() {
        assert_eq!(CookieJar::default().header_value(), None);
    }
}
