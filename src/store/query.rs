//! Sorting, paging and projection for the in-memory store.

use std::cmp::Ordering;

use mongodb::bson::{Bson, Document};

use super::error::{StoreError, StoreResult};
use super::filter::{compare_bson, lookup};
use super::QueryOptions;

/// Sort direction parsed from a sort document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

fn parse_sort(sort: &Document) -> StoreResult<Vec<(String, Direction)>> {
    sort.iter()
        .map(|(field, dir)| {
            let direction = match dir {
                Bson::Int32(1) | Bson::Int64(1) => Direction::Ascending,
                Bson::Int32(-1) | Bson::Int64(-1) => Direction::Descending,
                Bson::Double(d) if *d == 1.0 => Direction::Ascending,
                Bson::Double(d) if *d == -1.0 => Direction::Descending,
                other => {
                    return Err(StoreError::InvalidArgument(format!(
                        "invalid sort direction for '{}': {}",
                        field, other
                    )))
                }
            };
            Ok((field.clone(), direction))
        })
        .collect()
}

/// Order documents by a sort specification; missing fields sort as null.
pub fn sort_documents(documents: &mut [Document], sort: &Document) -> StoreResult<()> {
    let keys = parse_sort(sort)?;
    if keys.is_empty() {
        return Ok(());
    }

    documents.sort_by(|a, b| {
        for (field, direction) in &keys {
            let left = lookup(a, field).unwrap_or(&Bson::Null);
            let right = lookup(b, field).unwrap_or(&Bson::Null);
            let ord = match direction {
                Direction::Ascending => compare_bson(left, right),
                Direction::Descending => compare_bson(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// A parsed projection.
#[derive(Debug, Clone, PartialEq)]
enum Projection {
    Include { fields: Vec<String>, with_id: bool },
    Exclude { fields: Vec<String> },
}

impl Projection {
    fn parse(spec: &Document) -> StoreResult<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        let mut with_id = true;

        for (field, flag) in spec {
            let on = match flag {
                Bson::Boolean(b) => *b,
                Bson::Int32(n) => *n != 0,
                Bson::Int64(n) => *n != 0,
                Bson::Double(n) => *n != 0.0,
                _ => {
                    return Err(StoreError::InvalidArgument(format!(
                        "projection operators are not supported: {}",
                        field
                    )))
                }
            };
            if field.contains('.') || field.starts_with('$') {
                return Err(StoreError::InvalidArgument(format!(
                    "nested projection paths are not supported: {}",
                    field
                )));
            }
            if field == "_id" {
                with_id = on;
            } else if on {
                include.push(field.clone());
            } else {
                exclude.push(field.clone());
            }
        }

        match (include.is_empty(), exclude.is_empty()) {
            (false, false) => Err(StoreError::InvalidArgument(
                "cannot mix inclusion and exclusion in a projection".to_string(),
            )),
            (false, true) => Ok(Projection::Include {
                fields: include,
                with_id,
            }),
            (true, _) => {
                if !with_id {
                    exclude.push("_id".to_string());
                }
                Ok(Projection::Exclude { fields: exclude })
            }
        }
    }

    fn apply(&self, document: Document) -> Document {
        match self {
            Projection::Include { fields, with_id } => document
                .into_iter()
                .filter(|(k, _)| (k == "_id" && *with_id) || fields.contains(k))
                .collect(),
            Projection::Exclude { fields } => document
                .into_iter()
                .filter(|(k, _)| !fields.contains(k))
                .collect(),
        }
    }
}

/// Check a projection document without applying it.
pub fn validate_projection(spec: &Document) -> StoreResult<()> {
    Projection::parse(spec).map(|_| ())
}

/// Sort, skip, limit and project an already-filtered result set.
pub fn shape(mut documents: Vec<Document>, options: &QueryOptions) -> StoreResult<Vec<Document>> {
    let projection = options
        .projection
        .as_ref()
        .map(Projection::parse)
        .transpose()?;

    if let Some(sort) = &options.sort {
        sort_documents(&mut documents, sort)?;
    }

    let skip = options.skip.unwrap_or(0) as usize;
    let limit = match options.limit {
        Some(0) | None => usize::MAX,
        Some(n) => n.unsigned_abs() as usize,
    };

    Ok(documents
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|d| match &projection {
            Some(p) => p.apply(d),
            None => d,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn people() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "carla", "age": 40 },
            doc! { "_id": 2, "name": "ana", "age": 25 },
            doc! { "_id": 3, "name": "bruno", "age": 25 },
            doc! { "_id": 4, "name": "dora" },
        ]
    }

    fn ids(docs: &[Document]) -> Vec<i32> {
        docs.iter().map(|d| d.get_i32("_id").unwrap()).collect()
    }

    #[test]
    fn test_sort_multiple_keys() {
        let mut docs = people();
        sort_documents(&mut docs, &doc! { "age": -1, "name": 1 }).unwrap();
        assert_eq!(ids(&docs), vec![1, 2, 3, 4]);

        sort_documents(&mut docs, &doc! { "age": 1, "name": -1 }).unwrap();
        // missing age sorts as null, before numbers
        assert_eq!(ids(&docs), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_invalid_sort_direction() {
        let mut docs = people();
        let result = sort_documents(&mut docs, &doc! { "age": 2 });
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_inclusion_projection() {
        let options = QueryOptions::new().projection(doc! { "_id": 0, "name": 1 });
        let shaped = shape(people(), &options).unwrap();
        assert_eq!(shaped[0], doc! { "name": "carla" });

        let with_id = QueryOptions::new().projection(doc! { "name": 1 });
        let shaped = shape(people(), &with_id).unwrap();
        assert_eq!(shaped[1], doc! { "_id": 2, "name": "ana" });
    }

    #[test]
    fn test_exclusion_projection() {
        let options = QueryOptions::new().projection(doc! { "age": 0 });
        let shaped = shape(people(), &options).unwrap();
        assert_eq!(shaped[0], doc! { "_id": 1, "name": "carla" });

        let only_id_out = QueryOptions::new().projection(doc! { "_id": false });
        let shaped = shape(people(), &only_id_out).unwrap();
        assert_eq!(shaped[3], doc! { "name": "dora" });
    }

    #[test]
    fn test_mixed_projection_rejected() {
        assert!(validate_projection(&doc! { "name": 1, "age": 0 }).is_err());
        assert!(validate_projection(&doc! { "tags": { "$slice": 1 } }).is_err());
        assert!(validate_projection(&doc! { "_id": 0, "name": 1 }).is_ok());
    }

    #[test]
    fn test_skip_and_limit() {
        let options = QueryOptions::new().sort(doc! { "_id": 1 }).skip(1).limit(2);
        let shaped = shape(people(), &options).unwrap();
        assert_eq!(ids(&shaped), vec![2, 3]);
    }
}
