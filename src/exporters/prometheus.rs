use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::collectors::MetricFamily;

/// Content type of the text exposition format.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Encodes metric families into the Prometheus text exposition format.
///
/// Each scrape loads its families into a fresh `prometheus::Registry`, so the
/// output is sorted by family name and families without points are omitted.
pub fn encode(families: &[MetricFamily]) -> prometheus::Result<String> {
    let registry = Registry::new();
    for family in families {
        let label_names: Vec<&str> = family.label_names.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(
            Opts::new(family.name.as_str(), family.help.as_str()),
            &label_names,
        )?;
        for point in &family.points {
            let values: Vec<&str> = point.label_values.iter().map(String::as_str).collect();
            gauge.get_metric_with_label_values(&values)?.set(point.value);
        }
        registry.register(Box::new(gauge))?;
    }
    TextEncoder::new().encode_to_string(&registry.gather())
}
