//! STAC catalog of the published datasets.
//!
//! The catalog holds a single collection whose items are the datasets.
//! Item assets point to the S3 API, where every dataset is a bucket of
//! Zarr keys.

use crate::cube::{Dataset, Variable};
use crate::error::Result;
use crate::gridmapping::GridMapping;
use crate::server::api::{ApiError, ApiResult};
use crate::server::config::ServerConfig;
use crate::server::context::DatasetsContext;
use crate::utils::format_datetime;
use crate::webapi::wmts::wgs84_bbox;
use chrono::Utc;
use log::warn;
use serde_json::{json, Map, Value};

pub const STAC_VERSION: &str = "0.9.0";

const DEFAULT_CATALOG_ID: &str = "xcube-server";
const DEFAULT_CATALOG_TITLE: &str = "xcube Server";
const DEFAULT_CATALOG_DESCRIPTION: &str = "Catalog of datasets served by xcube";
const DEFAULT_COLLECTION_ID: &str = "datasets";
const DEFAULT_COLLECTION_TITLE: &str = "Data cubes";
const DEFAULT_COLLECTION_DESCRIPTION: &str = "The data cubes published by this server";

/// Identifier, title and description
struct Metadata {
    id: String,
    title: String,
    description: String,
}

fn catalog_metadata(config: &ServerConfig) -> Metadata {
    let stac = config.stac.clone().unwrap_or_default();
    Metadata {
        id: stac.identifier.unwrap_or_else(|| DEFAULT_CATALOG_ID.to_string()),
        title: stac.title.unwrap_or_else(|| DEFAULT_CATALOG_TITLE.to_string()),
        description: stac
            .description
            .unwrap_or_else(|| DEFAULT_CATALOG_DESCRIPTION.to_string()),
    }
}

fn collection_metadata(config: &ServerConfig) -> Metadata {
    let collection = config
        .stac
        .as_ref()
        .and_then(|stac| stac.collection.clone())
        .unwrap_or_default();
    Metadata {
        id: collection
            .identifier
            .unwrap_or_else(|| DEFAULT_COLLECTION_ID.to_string()),
        title: collection
            .title
            .unwrap_or_else(|| DEFAULT_COLLECTION_TITLE.to_string()),
        description: collection
            .description
            .unwrap_or_else(|| DEFAULT_COLLECTION_DESCRIPTION.to_string()),
    }
}

fn service_url(config: &ServerConfig, base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), config.reverse_url_prefix())
}

fn check_collection(config: &ServerConfig, collection_id: &str) -> ApiResult<Metadata> {
    let metadata = collection_metadata(config);
    if metadata.id != collection_id {
        return Err(ApiError::not_found(format!(
            "Collection \"{collection_id}\" not found"
        )));
    }
    Ok(metadata)
}

/// The catalog root document
pub fn get_root(ctx: &DatasetsContext, base_url: &str) -> Value {
    let config = ctx.config();
    let url = service_url(&config, base_url);
    let catalog = catalog_metadata(&config);
    json!({
        "stac_version": STAC_VERSION,
        "id": catalog.id,
        "title": catalog.title,
        "description": catalog.description,
        "links": [
            {
                "rel": "self",
                "href": format!("{url}/catalog"),
                "type": "application/json",
                "title": "this document"
            },
            {
                "rel": "conformance",
                "href": format!("{url}/catalog/conformance"),
                "type": "application/json",
                "title": "OGC API conformance classes implemented by this server"
            },
            {
                "rel": "data",
                "href": format!("{url}/catalog/collections"),
                "type": "application/json",
                "title": "Information about the feature collections"
            }
        ]
    })
}

pub fn get_conformance() -> Value {
    json!({
        "conformsTo": [
            "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core",
            "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/geojson"
        ]
    })
}

fn datasets_collection(config: &ServerConfig, url: &str) -> Value {
    let collection = collection_metadata(config);
    json!({
        "stac_version": STAC_VERSION,
        "stac_extensions": ["xcube"],
        "id": collection.id,
        "title": collection.title,
        "description": collection.description,
        "license": "proprietary",
        "keywords": [],
        "providers": [],
        "extent": {},
        "summaries": {},
        "links": [
            {"rel": "self", "href": format!("{url}/catalog/collections/{}", collection.id)},
            {"rel": "root", "href": format!("{url}/catalog/collections")}
        ]
    })
}

pub fn get_collections(ctx: &DatasetsContext, base_url: &str) -> Value {
    let config = ctx.config();
    let url = service_url(&config, base_url);
    json!({"collections": [datasets_collection(&config, &url)]})
}

pub fn get_collection(
    ctx: &DatasetsContext,
    base_url: &str,
    collection_id: &str,
) -> ApiResult<Value> {
    let config = ctx.config();
    check_collection(&config, collection_id)?;
    Ok(datasets_collection(&config, &service_url(&config, base_url)))
}

/// Items of all visible datasets as GeoJSON feature collection
pub async fn get_collection_items(
    ctx: &DatasetsContext,
    base_url: &str,
    collection_id: &str,
) -> ApiResult<Value> {
    let config = ctx.config();
    let collection = check_collection(&config, collection_id)?;
    let url = service_url(&config, base_url);
    let mut features = Vec::new();
    for ds_config in ctx.get_dataset_configs() {
        if ds_config.hidden {
            continue;
        }
        let ml_dataset = ctx.get_ml_dataset(&ds_config.identifier).await?;
        let dataset = ml_dataset.get_dataset(0).await?;
        let feature = dataset_feature(
            &url,
            &collection.id,
            &ds_config.identifier,
            &dataset,
            ml_dataset.grid_mapping(),
        );
        match feature {
            Ok(feature) => features.push(feature),
            Err(e) => warn!("skipping dataset {:?} in STAC: {e}", ds_config.identifier),
        }
    }
    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
        "timeStamp": format_datetime(&Utc::now().naive_utc()),
        "numberMatched": features.len(),
        "numberReturned": features.len(),
    }))
}

pub async fn get_collection_item(
    ctx: &DatasetsContext,
    base_url: &str,
    collection_id: &str,
    feature_id: &str,
) -> ApiResult<Value> {
    let config = ctx.config();
    let collection = check_collection(&config, collection_id)?;
    let ml_dataset = ctx.get_ml_dataset(feature_id).await?;
    let dataset = ml_dataset.get_dataset(0).await?;
    Ok(dataset_feature(
        &service_url(&config, base_url),
        &collection.id,
        feature_id,
        &dataset,
        ml_dataset.grid_mapping(),
    )?)
}

/// The STAC item of a dataset
pub fn dataset_feature(
    url: &str,
    collection_id: &str,
    ds_id: &str,
    dataset: &Dataset,
    grid_mapping: &GridMapping,
) -> Result<Value> {
    let (x1, y1, x2, y2) = wgs84_bbox(grid_mapping)?;
    let variables: Vec<Value> = dataset
        .data_vars
        .iter()
        .map(|(name, var)| variable_asset(name, var))
        .collect();
    let coordinates: Vec<Value> = dataset
        .coords
        .iter()
        .map(|(name, var)| variable_asset(name, var))
        .collect();
    let bucket_url = format!("{url}/s3/{ds_id}");
    let analytic: Map<String, Value> = dataset
        .data_vars
        .keys()
        .map(|name| {
            let asset = json!({
                "title": format!("{name} data access"),
                "roles": ["data"],
                "type": "application/zarr",
                "href": format!("{bucket_url}/{name}"),
            });
            (name.clone(), asset)
        })
        .collect();
    Ok(json!({
        "stac_version": STAC_VERSION,
        "stac_extensions": ["xcube"],
        "type": "Feature",
        "id": ds_id,
        "bbox": [x1, y1, x2, y2],
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[x1, y1], [x1, y2], [x2, y2], [x2, y1], [x1, y1]]],
        },
        "properties": {
            "xcube:dimensions": dataset.dims,
            "xcube:variables": variables,
            "xcube:coordinates": coordinates,
            "xcube:attributes": dataset.attrs,
        },
        "collection": collection_id,
        "links": [
            {
                "rel": "self",
                "href": format!("{url}/catalog/collections/{collection_id}/items/{ds_id}"),
            }
        ],
        "assets": {
            "analytic": {
                "title": format!("{ds_id} data access"),
                "roles": ["data"],
                "type": "application/zarr",
                "href": bucket_url,
                "xcube:analytic": analytic,
            }
        }
    }))
}

pub fn variable_asset(name: &str, var: &Variable) -> Value {
    json!({
        "name": name,
        "dtype": var.dtype.to_string(),
        "dims": var.dims,
        "chunks": var.chunks,
        "shape": var.shape(),
        "attrs": var.attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{new_cube, CubeVariable, NewCubeParams};

    fn context(yaml: &str) -> DatasetsContext {
        DatasetsContext::new(ServerConfig::from_yaml_str(yaml).unwrap())
    }

    #[test]
    fn test_root_and_collections() {
        let ctx = context("datasets: []");
        let root = get_root(&ctx, "http://localhost:8080/");
        assert_eq!(root["id"], "xcube-server");
        assert_eq!(root["links"][0]["href"], "http://localhost:8080/catalog");
        assert!(get_conformance()["conformsTo"].is_array());

        let collections = get_collections(&ctx, "http://localhost:8080");
        assert_eq!(collections["collections"][0]["id"], "datasets");
        assert_eq!(
            collections["collections"][0]["links"][0]["href"],
            "http://localhost:8080/catalog/collections/datasets"
        );
        assert!(get_collection(&ctx, "http://localhost:8080", "datasets").is_ok());
        let error = get_collection(&ctx, "http://localhost:8080", "cubes").unwrap_err();
        assert_eq!(error.status_code, 404);
    }

    #[test]
    fn test_configured_metadata() {
        let ctx = context(
            r#"
url_prefix: api
stac:
  identifier: my-catalog
  title: My Catalog
  collection:
    identifier: cubes
    description: Some cubes
"#,
        );
        let root = get_root(&ctx, "https://xcube.org");
        assert_eq!(root["id"], "my-catalog");
        assert_eq!(root["title"], "My Catalog");
        assert_eq!(root["description"], DEFAULT_CATALOG_DESCRIPTION);
        assert_eq!(root["links"][2]["href"], "https://xcube.org/api/catalog/collections");
        let collection = get_collection(&ctx, "https://xcube.org", "cubes").unwrap();
        assert_eq!(collection["title"], DEFAULT_COLLECTION_TITLE);
        assert_eq!(collection["description"], "Some cubes");
    }

    #[test]
    fn test_dataset_feature() {
        let params = NewCubeParams {
            width: 40,
            height: 20,
            spatial_res: 0.25,
            time_periods: 2,
            ..NewCubeParams::default()
        }
        .with_variable("conc_chl", CubeVariable::Constant(1.0));
        let cube = new_cube(&params).unwrap();
        let grid_mapping = GridMapping::from_dataset(&cube, None).unwrap();
        let feature =
            dataset_feature("http://localhost", "datasets", "demo", &cube, &grid_mapping).unwrap();
        assert_eq!(feature["id"], "demo");
        assert_eq!(feature["bbox"], json!([-180.0, -90.0, -170.0, -85.0]));
        assert_eq!(feature["geometry"]["coordinates"][0][2], json!([-170.0, -85.0]));
        assert_eq!(
            feature["properties"]["xcube:dimensions"],
            json!({"lon": 40, "lat": 20, "time": 2})
        );
        let variable = &feature["properties"]["xcube:variables"][0];
        assert_eq!(variable["name"], "conc_chl");
        assert_eq!(variable["dtype"], "float64");
        assert_eq!(variable["shape"], json!([2, 20, 40]));
        assert_eq!(feature["assets"]["analytic"]["href"], "http://localhost/s3/demo");
        assert_eq!(
            feature["assets"]["analytic"]["xcube:analytic"]["conc_chl"]["href"],
            "http://localhost/s3/demo/conc_chl"
        );
        assert_eq!(
            feature["links"][0]["href"],
            "http://localhost/catalog/collections/datasets/items/demo"
        );
    }
}
