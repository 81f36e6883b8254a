#![allow(dead_code)]

use ezstore_core::{records_from_json, Entity, EntitySchema, RawRecord};
use once_cell::sync::Lazy;
use serde_json::Value;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub rating: f64,
    pub published: bool,
    pub summary: Option<String>,
}

static ARTICLE_SCHEMA: Lazy<EntitySchema<Article>> = Lazy::new(|| {
    EntitySchema::builder("Article")
        .field("id", |a: &Article| a.id, |a, v| a.id = v)
        .field("title", |a: &Article| a.title.clone(), |a, v| a.title = v)
        .field("rating", |a: &Article| a.rating, |a, v| a.rating = v)
        .field("published", |a: &Article| a.published, |a, v| a.published = v)
        .field("summary", |a: &Article| a.summary.clone(), |a, v| a.summary = v)
        .identity("id")
        .build()
        .unwrap()
});

impl Entity for Article {
    fn schema() -> &'static EntitySchema<Self> {
        &ARTICLE_SCHEMA
    }
}

pub fn article(id: i64, title: &str) -> Article {
    Article {
        id,
        title: title.to_string(),
        ..Article::default()
    }
}

pub fn records(value: Value) -> Vec<RawRecord> {
    records_from_json(value).unwrap()
}
