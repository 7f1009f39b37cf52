//! Free-form metadata attached to batch results and jobs.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// Ordered string-keyed metadata map.
pub type Metadata = BTreeMap<String, JsonValue>;

/// Copy every entry of `from` into `into`, overwriting existing keys.
pub fn merge_metadata(into: &mut Metadata, from: &Metadata) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_values_win() {
        let mut base = Metadata::new();
        base.insert("source".into(), json!("cron"));
        base.insert("month".into(), json!("2024-01"));

        let mut update = Metadata::new();
        update.insert("month".into(), json!("2024-02"));

        merge_metadata(&mut base, &update);

        assert_eq!(base["source"], json!("cron"));
        assert_eq!(base["month"], json!("2024-02"));
    }
}
