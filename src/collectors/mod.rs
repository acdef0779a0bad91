pub mod bminer;
pub mod dstm;
pub mod flypool;
pub mod gpu;

use async_trait::async_trait;

use crate::error::CollectionError;

// A single gauge sample
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    pub label_values: Vec<String>,
    pub value: f64,
}

/// A named group of gauge points sharing one label schema.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    pub points: Vec<MetricPoint>,
}

impl MetricFamily {
    pub fn gauge(name: &str, help: &str, label_names: &[&str]) -> Self {
        MetricFamily {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            points: Vec::new(),
        }
    }

    pub fn add_metric(&mut self, label_values: &[&str], value: f64) {
        debug_assert_eq!(
            label_values.len(),
            self.label_names.len(),
            "label values do not match the schema of {}",
            self.name
        );
        self.points.push(MetricPoint {
            name: self.name.clone(),
            help: self.help.clone(),
            label_names: self.label_names.clone(),
            label_values: label_values.iter().map(|v| v.to_string()).collect(),
            value,
        });
    }

    /// Value of the point whose labels equal `label_values`, if any.
    #[cfg(test)]
    pub fn value(&self, label_values: &[&str]) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.label_values.iter().map(String::as_str).eq(label_values.iter().copied()))
            .map(|p| p.value)
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectionError>;
}

#[cfg(test)]
pub(crate) fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
    families
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("missing family {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_metric_carries_schema() {
        let mut fam = MetricFamily::gauge("miner_hashrate", "Hashrate", &["gpu_id", "type"]);
        fam.add_metric(&["GPU-1", "current"], 50.0);
        fam.add_metric(&["GPU-1", "average"], 48.0);

        assert_eq!(fam.points.len(), 2);
        for point in &fam.points {
            assert_eq!(point.name, "miner_hashrate");
            assert_eq!(point.help, "Hashrate");
            assert_eq!(point.label_names, fam.label_names);
            assert_eq!(point.label_values.len(), point.label_names.len());
        }
        assert_eq!(fam.value(&["GPU-1", "average"]), Some(48.0));
        assert_eq!(fam.value(&["GPU-2", "average"]), None);
    }
}
