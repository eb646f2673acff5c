//! Ordered query-string builder.
//!
//! The service uses repeated `key[]=value` parameters for sets, so a plain
//! map won't do; pairs keep their insertion order.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, String)>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.push((key.into(), value.to_string()));
        self
    }

    /// Push one pair per value under the same key.
    pub fn extend<V: ToString>(&mut self, key: &str, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.0.extend(values.into_iter().map(|value| (key.to_string(), value.to_string())));
        self
    }

    /// Builder-style [`push()`](Self::push).
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    /// Builder-style [`extend()`](Self::extend).
    pub fn with_all<V: ToString>(mut self, key: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.extend(key, values);
        self
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs().find(|(k, _)| *k == key).map(|(_, value)| value)
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs().filter(|(k, _)| *k == key).map(|(_, value)| value).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_keys_keep_order() {
        let query = Query::new().with("limit", 100).with_all("contentRating[]", ["safe", "suggestive"]).with("offset", 0);
        assert_eq!(query.get_all("contentRating[]"), vec!["safe", "suggestive"]);
        assert_eq!(query.get("limit"), Some("100"));
        let keys: Vec<&str> = query.pairs().map(|(key, _)| key).collect();
        assert_eq!(keys, ["limit", "contentRating[]", "contentRating[]", "offset"]);
        assert!(Query::new().is_empty());
    }
}
