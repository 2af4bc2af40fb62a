use serde::Serialize;

use twittermap_common::Granularity;

/// Join of a per-geography aggregate against a population table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    pub join_key: Vec<String>,
    pub dataset: String,
    pub lookup_key: Vec<String>,
    pub select: Vec<String>,
    #[serde(rename = "as")]
    pub as_: Vec<String>,
}

/// Population table joined onto by-geography results at `level`.
pub fn population_target(level: Granularity) -> JoinSpec {
    let dataset = match level {
        Granularity::State => "twitter.dsStatePopulation",
        Granularity::County => "twitter.dsCountyPopulation",
        Granularity::City => "twitter.dsCityPopulation",
    };

    JoinSpec {
        join_key: vec![level.as_str().to_string()],
        dataset: dataset.to_string(),
        lookup_key: vec![level.id_field().to_string()],
        select: vec!["population".to_string()],
        as_: vec!["population".to_string()],
    }
}
