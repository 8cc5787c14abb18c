use std::collections::HashMap;

use crate::ports::TelemetrySink;

const VALUE_EPSILON: f32 = 0.01;

/// Change filter in front of a [`TelemetrySink`].
#[derive(Debug, Default)]
pub struct Publisher {
    values: HashMap<&'static str, f32>,
    texts: HashMap<&'static str, String>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish when the value moved beyond the epsilon, was never published,
    /// or `force` is set. Non-finite values are dropped.
    pub fn value(
        &mut self,
        sink: &mut impl TelemetrySink,
        name: &'static str,
        value: f32,
        force: bool,
    ) -> bool {
        if !value.is_finite() {
            return false;
        }
        let changed = self
            .values
            .get(name)
            .map_or(true, |last| (last - value).abs() > VALUE_EPSILON);
        if !(changed || force) {
            return false;
        }
        self.values.insert(name, value);
        sink.publish(name, value);
        true
    }

    pub fn text(
        &mut self,
        sink: &mut impl TelemetrySink,
        name: &'static str,
        value: &str,
        force: bool,
    ) -> bool {
        if !force && self.texts.get(name).is_some_and(|last| last == value) {
            return false;
        }
        self.texts.insert(name, value.to_string());
        sink.publish_text(name, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::fake::RecordingSink;

    #[test]
    fn filters_small_changes() {
        let mut sink = RecordingSink::default();
        let mut publisher = Publisher::new();

        assert!(publisher.value(&mut sink, "voltage", 12.3, false));
        assert!(!publisher.value(&mut sink, "voltage", 12.305, false));
        assert!(publisher.value(&mut sink, "voltage", 12.4, false));
        assert!(publisher.value(&mut sink, "voltage", 12.4, true));
        assert!(!publisher.value(&mut sink, "voltage", f32::NAN, true));

        assert_eq!(sink.values("voltage"), vec!["12.3", "12.4", "12.4"]);
    }

    #[test]
    fn text_only_on_change() {
        let mut sink = RecordingSink::default();
        let mut publisher = Publisher::new();

        publisher.text(&mut sink, "status_text", "Standby", false);
        publisher.text(&mut sink, "status_text", "Standby", false);
        publisher.text(&mut sink, "status_text", "Starting", false);
        publisher.text(&mut sink, "status_text", "Starting", true);

        assert_eq!(
            sink.values("status_text"),
            vec!["Standby", "Starting", "Starting"]
        );
    }
}
