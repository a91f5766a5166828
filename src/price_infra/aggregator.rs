use serde::{Deserialize, Serialize};

use super::PriceSample;

/// Requested or effective aggregation method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    TrimmedMean,
    Median,
    Mean,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::TrimmedMean => "trimmed_mean",
            Method::Median => "median",
            Method::Mean => "mean",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "trimmed_mean" => Some(Method::TrimmedMean),
            "median" => Some(Method::Median),
            "mean" => Some(Method::Mean),
            _ => None,
        }
    }
}

pub struct Aggregate {
    pub value: f64,
    pub method: Method,
    pub used: Vec<PriceSample>,
}

/// Deterministic downgrade ladder: the trimmed mean needs five samples to
/// clip outliers safely and the median needs three; below that the method
/// degrades rather than refusing. Callers asking for `median` or `mean`
/// directly never get upgraded.
pub fn aggregate(samples: &[PriceSample], requested: Method) -> Aggregate {
    match requested {
        Method::TrimmedMean if samples.len() >= 5 => {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.value.total_cmp(&b.value));
            let middle = &sorted[1..sorted.len() - 1];
            Aggregate {
                value: mean(middle),
                method: Method::TrimmedMean,
                used: middle.to_vec(),
            }
        }
        Method::TrimmedMean | Method::Median if samples.len() >= 3 => Aggregate {
            value: median(samples),
            method: Method::Median,
            used: samples.to_vec(),
        },
        _ => Aggregate {
            value: mean(samples),
            method: Method::Mean,
            used: samples.to_vec(),
        },
    }
}

fn mean(samples: &[PriceSample]) -> f64 {
    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
}

fn median(samples: &[PriceSample]) -> f64 {
    let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
