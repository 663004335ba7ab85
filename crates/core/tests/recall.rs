//! Recall of approximate search against exact linear scans.

mod common;

use common::{build, clustered, exact_top_k, flatten, recall, uniform};
use quantann_core::{
    metadata_from, DeleteMode, DistanceMetric, FilterExpr, HnswIndex, IndexConfig,
    MetadataValue, QuantizationConfig, SearchOptions,
};
use std::collections::HashSet;

#[test]
fn recall_at_default_ef_search() {
    let data = uniform(2_000, 64, 1);
    let queries = uniform(50, 64, 2);
    let index = build(&data, DistanceMetric::Cosine, IndexConfig::default());

    let r = recall(&index, &data, &queries, 10, &SearchOptions::default());
    assert!(r >= 0.9, "recall@10 = {r}");
}

#[test]
fn recall_does_not_drop_as_ef_grows() {
    let data = uniform(2_000, 32, 3);
    let queries = uniform(50, 32, 4);
    let config = IndexConfig {
        m: 8,
        ef_construction: 64,
        ..IndexConfig::default()
    };
    let index = build(&data, DistanceMetric::Euclidean, config);

    let r10 = recall(&index, &data, &queries, 10, &SearchOptions::default().with_ef(10));
    let r50 = recall(&index, &data, &queries, 10, &SearchOptions::default().with_ef(50));
    let r200 = recall(&index, &data, &queries, 10, &SearchOptions::default().with_ef(200));
    assert!(r10 <= r50 && r50 <= r200, "{r10} {r50} {r200}");
    assert!(r200 >= 0.95, "recall@10 at ef=200 = {r200}");
}

#[test]
fn self_query_returns_own_id_for_every_metric() {
    let data = uniform(300, 16, 5);
    for metric in [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::Manhattan,
    ] {
        let index = build(&data, metric, IndexConfig::default());
        for (i, v) in data.iter().enumerate().take(50) {
            let hits = index.search(v, 1, &SearchOptions::default()).unwrap();
            assert_eq!(hits[0].id, i.to_string(), "{metric}");
        }
    }

    // Dot product is not a metric: the best match for x is the longest
    // vector pointing its way, not x itself
    let index = build(&data, DistanceMetric::DotProduct, IndexConfig::default());
    let r = recall(&index, &data, &data[..30], 5, &SearchOptions::default());
    assert!(r >= 0.9, "dot product recall@5 = {r}");
}

#[test]
fn filtered_category_scenario() {
    let data = uniform(1_000, 128, 6);
    let queries = uniform(20, 128, 7);
    let mut index = HnswIndex::new(128, DistanceMetric::Cosine, IndexConfig::default()).unwrap();
    for (i, v) in data.iter().enumerate() {
        let category = if i % 2 == 0 { "A" } else { "B" };
        index
            .insert(i.to_string(), v, Some(metadata_from([("category", category)])))
            .unwrap();
    }

    let category_a: Vec<Vec<f32>> = data.iter().step_by(2).cloned().collect();
    let filter = FilterExpr::eq("category", "A");
    let measure = |ef: usize| {
        let options = SearchOptions::default().with_ef(ef).with_filter(filter.clone());
        let mut found = 0;
        for q in &queries {
            let hits = index.search(q, 10, &options).unwrap();
            assert_eq!(hits.len(), 10);
            for h in &hits {
                let meta = h.metadata.as_ref().unwrap();
                assert_eq!(meta["category"], MetadataValue::from("A"));
            }
            // Positions in `category_a` map back to even ids
            let truth: HashSet<String> = exact_top_k(&category_a, q, 10, DistanceMetric::Cosine)
                .into_iter()
                .map(|pos| (pos.parse::<usize>().unwrap() * 2).to_string())
                .collect();
            found += hits.iter().filter(|h| truth.contains(&h.id)).count();
        }
        found as f64 / (queries.len() * 10) as f64
    };

    let r50 = measure(50);
    let r200 = measure(200);
    assert!(r200 >= r50, "ef=50: {r50}, ef=200: {r200}");
    assert!(r200 >= 0.9, "filtered recall at ef=200 = {r200}");
}

#[test]
fn selective_filter_still_fills_k() {
    let data = uniform(1_000, 32, 8);
    let mut index = HnswIndex::new(32, DistanceMetric::Euclidean, IndexConfig::default()).unwrap();
    for (i, v) in data.iter().enumerate() {
        let meta = metadata_from([("bucket", MetadataValue::from((i % 50) as i64))]);
        index.insert(i.to_string(), v, Some(meta)).unwrap();
    }
    // 20 matching nodes out of 1,000
    let options = SearchOptions::default()
        .with_ef(10)
        .with_filter(FilterExpr::eq("bucket", 7i64));
    let hits = index.search(&data[0], 10, &options).unwrap();
    assert_eq!(hits.len(), 10);
    assert!(hits.iter().all(|h| h.id.parse::<usize>().unwrap() % 50 == 7));
}

#[test]
fn scalar_codes_keep_recall() {
    let all = clustered(2_040, 64, 20, 0.3, 9);
    let (data, queries) = all.split_at(2_000);
    let config = IndexConfig {
        quantization: QuantizationConfig::Scalar,
        ..IndexConfig::default()
    };
    let mut index = HnswIndex::new(64, DistanceMetric::Euclidean, config).unwrap();
    index.train_quantizer(&flatten(data)).unwrap();
    for (i, v) in data.iter().enumerate() {
        index.insert(i.to_string(), v, None).unwrap();
    }

    let r = recall(&index, data, queries, 10, &SearchOptions::default());
    assert!(r >= 0.85, "scalar recall@10 = {r}");
    assert_eq!(index.stats().compression_ratio, 4.0);
}

#[test]
fn product_codes_keep_useful_recall() {
    let all = clustered(2_040, 64, 20, 0.3, 11);
    let (data, queries) = all.split_at(2_000);
    let config = IndexConfig {
        quantization: QuantizationConfig::Product {
            subvectors: 32,
            bits: 8,
        },
        ..IndexConfig::default()
    };
    let mut index = HnswIndex::new(64, DistanceMetric::Euclidean, config).unwrap();
    index.train_quantizer(&flatten(data)).unwrap();
    for (i, v) in data.iter().enumerate() {
        index.insert(i.to_string(), v, None).unwrap();
    }

    let r = recall(&index, data, queries, 10, &SearchOptions::default());
    assert!(r >= 0.5, "pq recall@10 = {r}");
    assert_eq!(index.stats().compression_ratio, 8.0);
}

#[test]
fn product_codes_with_raw_rerank() {
    let all = clustered(2_040, 64, 20, 0.3, 13);
    let (data, queries) = all.split_at(2_000);
    let config = IndexConfig {
        quantization: QuantizationConfig::Product {
            subvectors: 8,
            bits: 8,
        },
        store_raw_vectors: true,
        ..IndexConfig::default()
    };
    let mut index = build(data, DistanceMetric::Euclidean, config);
    index.train_quantizer_from_index().unwrap();

    let r = recall(&index, data, queries, 10, &SearchOptions::default());
    assert!(r >= 0.85, "reranked pq recall@10 = {r}");
}

#[test]
fn binary_codes_find_perturbed_source() {
    let data = uniform(1_000, 128, 15);
    let config = IndexConfig {
        quantization: QuantizationConfig::Binary,
        store_raw_vectors: true,
        ..IndexConfig::default()
    };
    let mut index = build(&data, DistanceMetric::Cosine, config);
    index.train_quantizer_from_index().unwrap();
    assert_eq!(index.stats().compression_ratio, 32.0);

    let noise = uniform(100, 128, 16);
    let mut hits = 0;
    for (i, n) in noise.iter().enumerate() {
        let query: Vec<f32> = data[i].iter().zip(n).map(|(x, e)| x + 0.05 * e).collect();
        let results = index.search(&query, 10, &SearchOptions::default()).unwrap();
        if results.iter().any(|r| r.id == i.to_string()) {
            hits += 1;
        }
    }
    assert!(hits >= 90, "found {hits}/100 perturbed sources");
}

#[test]
fn hard_delete_keeps_graph_connected() {
    let data = uniform(600, 16, 17);
    let config = IndexConfig {
        m: 6,
        ef_construction: 48,
        ..IndexConfig::default()
    };
    let mut index = build(&data, DistanceMetric::Euclidean, config);

    for i in (0..600).step_by(3) {
        assert!(index.delete(&i.to_string(), DeleteMode::Hard).unwrap());
    }
    assert_eq!(index.len(), 400);
    assert!(index.is_connected());
    index.check_integrity().unwrap();

    for i in (0..600).step_by(3).take(40) {
        let hits = index.search(&data[i], 10, &SearchOptions::default()).unwrap();
        assert!(hits.iter().all(|h| h.id.parse::<usize>().unwrap() % 3 != 0));
    }

    let survivors: Vec<Vec<f32>> = data
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 0)
        .map(|(_, v)| v.clone())
        .collect();
    let queries = uniform(30, 16, 18);
    let options = SearchOptions::default();
    let mut found = 0;
    for q in &queries {
        let truth: HashSet<String> = exact_top_k(&survivors, q, 10, DistanceMetric::Euclidean)
            .into_iter()
            .map(|pos| {
                // Survivor position p is original id p + p / 2 + 1
                let p: usize = pos.parse().unwrap();
                (p + p / 2 + 1).to_string()
            })
            .collect();
        let hits = index.search(q, 10, &options).unwrap();
        found += hits.iter().filter(|h| truth.contains(&h.id)).count();
    }
    let r = found as f64 / 300.0;
    assert!(r >= 0.9, "recall after hard deletes = {r}");
}
