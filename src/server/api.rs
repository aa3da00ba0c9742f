//! API descriptors, routes and HTTP errors

use crate::error::{Result, XcubeError};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// An error terminating a request with an HTTP status code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HTTP status {status_code}{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct ApiError {
    pub status_code: u16,
    pub message: Option<String>,
}

/// Result type of API controllers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn new(status_code: u16, message: Option<String>) -> Self {
        Self {
            status_code,
            message,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, Some(message.into()))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, Some(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, Some(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, Some(message.into()))
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(405, Some(message.into()))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, Some(message.into()))
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(410, Some(message.into()))
    }

    pub fn content_too_large(message: impl Into<String>) -> Self {
        Self::new(413, Some(message.into()))
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(500, Some(message.into()))
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(501, Some(message.into()))
    }

    /// Non-standard status for a broken server configuration
    pub fn invalid_server_config(message: impl Into<String>) -> Self {
        Self::new(580, Some(message.into()))
    }
}

impl From<XcubeError> for ApiError {
    fn from(error: XcubeError) -> Self {
        let status_code = match &error {
            XcubeError::NotFound(_) => 404,
            XcubeError::InvalidValue(_)
            | XcubeError::InvalidDimensions(_)
            | XcubeError::OutOfBounds(_)
            | XcubeError::InvalidUrl(_) => 400,
            _ => 500,
        };
        Self::new(status_code, Some(error.to_string()))
    }
}

/// HTTP methods a route can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

/// A route of an API: a path pattern with `{name}` placeholders
/// served by a named operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiRoute {
    pub api_name: String,
    pub path: String,
    pub operation_id: String,
    pub methods: Vec<HttpMethod>,
}

impl ApiRoute {
    pub fn new(
        api_name: impl Into<String>,
        path: impl Into<String>,
        operation_id: impl Into<String>,
    ) -> Self {
        Self {
            api_name: api_name.into(),
            path: path.into(),
            operation_id: operation_id.into(),
            methods: vec![HttpMethod::Get],
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Match a request path, returning the placeholder values.
    ///
    /// A trailing `{name:path}` placeholder takes the rest of the path.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let pattern: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let mut params = HashMap::new();
        for (i, part) in pattern.iter().enumerate() {
            match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) if name.ends_with(":path") => {
                    let rest = segments.get(i..)?.join("/");
                    params.insert(name.trim_end_matches(":path").to_string(), rest);
                    return Some(params);
                }
                Some(name) => {
                    let segment = segments.get(i).filter(|s| !s.is_empty())?;
                    params.insert(name.to_string(), segment.to_string());
                }
                None if segments.get(i) == Some(part) => {}
                None => return None,
            }
        }
        (segments.len() == pattern.len()).then_some(params)
    }
}

/// Description of a server API
#[derive(Debug, Clone, PartialEq)]
pub struct Api {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub required_apis: Vec<String>,
    pub optional_apis: Vec<String>,
    pub routes: Vec<ApiRoute>,
}

impl Api {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.0.0".to_string(),
            description: None,
            required_apis: Vec::new(),
            optional_apis: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_required_apis<S: Into<String>>(mut self, apis: impl IntoIterator<Item = S>) -> Self {
        self.required_apis = apis.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_optional_apis<S: Into<String>>(mut self, apis: impl IntoIterator<Item = S>) -> Self {
        self.optional_apis = apis.into_iter().map(Into::into).collect();
        self
    }

    /// Add a GET route served by `operation_id`
    pub fn route(mut self, path: impl Into<String>, operation_id: impl Into<String>) -> Self {
        let route = ApiRoute::new(self.name.clone(), path, operation_id);
        self.routes.push(route);
        self
    }

    /// Required APIs and those optional APIs that are available
    fn dependencies(&self, available: &HashMap<&str, &Api>) -> Vec<&str> {
        self.required_apis
            .iter()
            .map(String::as_str)
            .chain(
                self.optional_apis
                    .iter()
                    .map(String::as_str)
                    .filter(|name| available.contains_key(*name)),
            )
            .collect()
    }
}

/// Order APIs so that every API comes after the APIs it depends on.
///
/// APIs are sorted by their transitive dependency count, ties keep
/// their given order. A missing required API or a dependency cycle
/// is a configuration error.
pub fn get_server_apis(apis: Vec<Api>) -> Result<Vec<Api>> {
    let available: HashMap<&str, &Api> = apis.iter().map(|api| (api.name.as_str(), api)).collect();

    fn count_deps<'a>(
        api: &'a Api,
        available: &HashMap<&str, &'a Api>,
        visiting: &mut Vec<&'a str>,
    ) -> Result<usize> {
        if visiting.contains(&api.name.as_str()) {
            return Err(XcubeError::Configuration(format!(
                "cyclic dependency of API {:?}",
                api.name
            )));
        }
        visiting.push(&api.name);
        let mut count = 0;
        for dep_name in api.dependencies(available) {
            let dep = available.get(dep_name).copied().ok_or_else(|| {
                XcubeError::Configuration(format!(
                    "API {:?} requires unknown API {dep_name:?}",
                    api.name
                ))
            })?;
            count += count_deps(dep, available, visiting)? + 1;
        }
        visiting.pop();
        Ok(count)
    }

    let mut counts = HashMap::new();
    for api in &apis {
        counts.insert(api.name.clone(), count_deps(api, &available, &mut Vec::new())?);
    }
    let mut ordered = apis.clone();
    ordered.sort_by_key(|api| counts.get(&api.name).copied().unwrap_or(0));
    Ok(ordered)
}

/// The APIs served on top of configured datasets
pub fn default_server_apis() -> Vec<Api> {
    let version = env!("CARGO_PKG_VERSION");
    vec![
        Api::new("coverages")
            .with_version(version)
            .with_description("OGC API Coverages")
            .with_required_apis(["datasets"])
            .route("/ogc/collections/{collectionId}/coverage", "get_coverage")
            .route("/ogc/collections/{collectionId}/coverage/domainset", "get_coverage_domainset")
            .route("/ogc/collections/{collectionId}/coverage/rangetype", "get_coverage_rangetype")
            .route("/ogc/collections/{collectionId}/coverage/metadata", "get_coverage_metadata"),
        Api::new("statistics")
            .with_version(version)
            .with_description("Statistics of variables within geometries")
            .with_required_apis(["datasets"])
            .route("/statistics/{datasetId}/{varName}", "compute_statistics"),
        Api::new("s3")
            .with_version(version)
            .with_description("S3-compatible read access to datasets")
            .with_required_apis(["datasets"])
            .route("/s3/{bucket}", "list_bucket")
            .route("/s3/{bucket}/{key:path}", "get_object"),
        Api::new("stac")
            .with_version(version)
            .with_description("STAC catalog of the published datasets")
            .with_required_apis(["datasets"])
            .route("/catalog", "get_root")
            .route("/catalog/conformance", "get_conformance")
            .route("/catalog/collections", "get_collections")
            .route("/catalog/collections/{collectionId}", "get_collection")
            .route("/catalog/collections/{collectionId}/items", "get_collection_items")
            .route(
                "/catalog/collections/{collectionId}/items/{featureId}",
                "get_collection_item",
            ),
        Api::new("wmts")
            .with_version(version)
            .with_description("OGC Web Map Tile Service")
            .with_required_apis(["datasets"])
            .with_optional_apis(["styles"])
            .route("/wmts/1.0.0/WMTSCapabilities.xml", "get_capabilities")
            .route("/wmts/kvp", "get_capabilities_kvp"),
        Api::new("datasets")
            .with_version(version)
            .with_description("Published datasets")
            .route("/datasets", "get_datasets")
            .route("/datasets/{datasetId}", "get_dataset"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_defaults() {
        let api = Api::new("datasets");
        assert_eq!(api.name, "datasets");
        assert_eq!(api.version, "0.0.0");
        assert_eq!(api.description, None);
        assert!(api.required_apis.is_empty());
        assert!(api.optional_apis.is_empty());
        assert!(api.routes.is_empty());
    }

    #[test]
    fn test_routes() {
        let api = Api::new("datasets")
            .route("/datasets", "get_datasets")
            .route("/datasets/{dataset_id}", "get_dataset");
        assert_eq!(
            api.routes,
            vec![
                ApiRoute::new("datasets", "/datasets", "get_datasets"),
                ApiRoute::new("datasets", "/datasets/{dataset_id}", "get_dataset"),
            ]
        );
        assert_ne!(
            ApiRoute::new("datasets", "/datasets", "get_datasets"),
            ApiRoute::new("dataset", "/datasets", "get_datasets")
        );
    }

    #[test]
    fn test_match_path() {
        let route = ApiRoute::new("s3", "/s3/{bucket}/{key:path}", "get_object");
        let params = route.match_path("/s3/demo/conc_chl/0.0.0").unwrap();
        assert_eq!(params["bucket"], "demo");
        assert_eq!(params["key"], "conc_chl/0.0.0");

        let route = ApiRoute::new("datasets", "/datasets/{datasetId}", "get_dataset");
        assert_eq!(route.match_path("/datasets/demo").unwrap()["datasetId"], "demo");
        assert!(route.match_path("/datasets").is_none());
        assert!(route.match_path("/datasets/demo/extra").is_none());
        assert!(route.match_path("/places/demo").is_none());
    }

    #[test]
    fn test_api_error() {
        assert_eq!(ApiError::new(500, None).to_string(), "HTTP status 500");
        assert_eq!(
            ApiError::not_found("Dataset \"x\" not found").to_string(),
            "HTTP status 404: Dataset \"x\" not found"
        );
        assert_eq!(ApiError::invalid_server_config("oops").status_code, 580);
        let error: ApiError = XcubeError::NotFound("x".to_string()).into();
        assert_eq!(error.status_code, 404);
        let error: ApiError = XcubeError::InvalidValue("x".to_string()).into();
        assert_eq!(error.status_code, 400);
        let error: ApiError = XcubeError::Codec("x".to_string()).into();
        assert_eq!(error.status_code, 500);
    }

    #[test]
    fn test_get_server_apis() {
        let names = |apis: Vec<Api>| apis.into_iter().map(|a| a.name).collect::<Vec<_>>();

        let ordered = get_server_apis(vec![
            Api::new("timeseries").with_required_apis(["places", "datasets"]),
            Api::new("places").with_required_apis(["datasets"]),
            Api::new("viewer").with_optional_apis(["auth"]),
            Api::new("datasets"),
        ])
        .unwrap();
        assert_eq!(names(ordered), vec!["viewer", "datasets", "places", "timeseries"]);

        let ordered = get_server_apis(default_server_apis()).unwrap();
        assert_eq!(names(ordered)[0], "datasets");

        assert!(get_server_apis(vec![Api::new("places").with_required_apis(["datasets"])]).is_err());
        assert!(get_server_apis(vec![
            Api::new("a").with_required_apis(["b"]),
            Api::new("b").with_required_apis(["a"]),
        ])
        .is_err());
    }
}
