//! WMTS 1.0.0 Capabilities documents

use crate::crs::Crs;
use crate::cube::Dataset;
use crate::error::{Result, XcubeError};
use crate::gridmapping::GridMapping;
use crate::server::api::ApiResult;
use crate::server::config::ServiceProviderConfig;
use crate::server::context::DatasetsContext;
use crate::tiling::{TilingScheme, EARTH_RADIUS};
use crate::utils::format_datetime;
use crate::xml::Element;
use chrono::NaiveDateTime;
use log::warn;

pub const WMTS_VERSION: &str = "1.0.0";
const WMTS_NAMESPACE: &str = "http://www.opengis.net/wmts/1.0";
const OWS_NAMESPACE: &str = "http://www.opengis.net/ows/1.1";
const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const WMTS_SCHEMA_LOCATION: &str = "http://www.opengis.net/wmts/1.0 \
     http://schemas.opengis.net/wmts/1.0.0/wmtsGetCapabilities_response.xsd";
const TILE_FORMAT: &str = "image/png";

/// A variable published as layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerVariable {
    pub name: String,
    pub title: String,
    pub abstract_text: String,
}

/// A dataset whose variables are published as layers
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDataset {
    pub ds_id: String,
    pub title: String,
    pub grid_mapping: GridMapping,
    pub num_levels: usize,
    pub time_labels: Vec<NaiveDateTime>,
    pub variables: Vec<LayerVariable>,
}

impl LayerDataset {
    /// Describe the spatial data variables of a dataset
    pub fn from_dataset(
        ds_id: impl Into<String>,
        title: Option<String>,
        dataset: &Dataset,
        grid_mapping: GridMapping,
        num_levels: usize,
    ) -> Result<Self> {
        let ds_id = ds_id.into();
        let (x_name, y_name) = &grid_mapping.xy_dim_names;
        let variables = dataset
            .data_vars
            .iter()
            .filter(|(_, var)| {
                let n = var.dims.len();
                n >= 2 && &var.dims[n - 2] == y_name && &var.dims[n - 1] == x_name
            })
            .map(|(name, var)| LayerVariable {
                name: name.clone(),
                title: var
                    .attr_str("long_name")
                    .or_else(|| var.attr_str("title"))
                    .unwrap_or(name)
                    .to_string(),
                abstract_text: var
                    .attr_str("abstract")
                    .or_else(|| var.attr_str("comment"))
                    .unwrap_or("")
                    .to_string(),
            })
            .collect();
        let time_labels = if dataset.coords.contains_key("time") {
            dataset.time_labels()?
        } else {
            Vec::new()
        };
        let title = title
            .or_else(|| dataset.attr_str("title").map(String::from))
            .unwrap_or_else(|| ds_id.clone());
        Ok(Self {
            ds_id,
            title,
            grid_mapping,
            num_levels,
            time_labels,
            variables,
        })
    }

    /// Bounding box in WGS 84 degrees
    pub fn wgs84_bbox(&self) -> Result<(f64, f64, f64, f64)> {
        wgs84_bbox(&self.grid_mapping)
    }

    /// Finest and coarsest level needed in a tiling scheme
    fn tile_levels(&self, scheme: &TilingScheme) -> Result<(usize, usize)> {
        let finest = self.grid_mapping.xy_res.0;
        let coarsest = finest * (1usize << self.num_levels.saturating_sub(1)) as f64;
        scheme.get_levels_for_resolution(finest, coarsest, self.grid_mapping.crs.is_geographic())
    }
}

/// Bounding box of a geographic or Web Mercator grid in WGS 84 degrees
pub fn wgs84_bbox(grid_mapping: &GridMapping) -> Result<(f64, f64, f64, f64)> {
    if let Some(bbox) = grid_mapping.geographic_bbox() {
        return Ok(bbox);
    }
    match &grid_mapping.crs {
        crs if *crs == Crs::WEB_MERCATOR => {
            let (x0, y0, x1, y1) = grid_mapping.xy_bbox;
            let (lon0, lat0) = web_mercator_to_lon_lat(x0, y0);
            let (lon1, lat1) = web_mercator_to_lon_lat(x1, y1);
            Ok((lon0, lat0, lon1, lat1))
        }
        crs => Err(XcubeError::InvalidValue(format!(
            "cannot compute WGS 84 bounds in CRS {crs}"
        ))),
    }
}

/// Convert EPSG:3857 coordinates into longitude and latitude
pub fn web_mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Settings of a Capabilities document
#[derive(Debug, Clone, PartialEq)]
pub struct WmtsOptions {
    /// Service URL, without trailing slash
    pub base_url: String,
    /// Identifiers of the published tile matrix sets
    pub tile_matrix_sets: Vec<String>,
    pub service_provider: ServiceProviderConfig,
}

impl Default for WmtsOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            tile_matrix_sets: vec![
                "WorldCRS84Quad".to_string(),
                "WorldWebMercatorQuad".to_string(),
            ],
            service_provider: ServiceProviderConfig::default(),
        }
    }
}

/// Generator of WMTS Capabilities documents
pub struct WmtsCapabilities<'a> {
    datasets: &'a [LayerDataset],
    options: &'a WmtsOptions,
    schemes: Vec<TilingScheme>,
}

impl<'a> WmtsCapabilities<'a> {
    pub fn new(datasets: &'a [LayerDataset], options: &'a WmtsOptions) -> Result<Self> {
        let schemes = options
            .tile_matrix_sets
            .iter()
            .map(|id| TilingScheme::for_name(id))
            .collect::<Result<Vec<_>>>()?;
        if schemes.is_empty() {
            return Err(XcubeError::InvalidValue(
                "at least one tile matrix set is required".to_string(),
            ));
        }
        Ok(Self {
            datasets,
            options,
            schemes,
        })
    }

    fn base_url(&self) -> &str {
        self.options.base_url.trim_end_matches('/')
    }

    pub fn to_element(&self) -> Result<Element> {
        let base_url = self.base_url();
        Ok(Element::new("Capabilities")
            .attr("xmlns", WMTS_NAMESPACE)
            .attr("xmlns:ows", OWS_NAMESPACE)
            .attr("xmlns:xlink", XLINK_NAMESPACE)
            .attr("xmlns:xsi", XSI_NAMESPACE)
            .attr("xsi:schemaLocation", WMTS_SCHEMA_LOCATION)
            .attr("version", WMTS_VERSION)
            .child(self.service_identification())
            .child(self.service_provider())
            .child(self.operations_metadata())
            .child(self.contents()?)
            .child(self.themes())
            .child(Element::new("ServiceMetadataURL").attr(
                "xlink:href",
                format!("{base_url}/wmts/{WMTS_VERSION}/WMTSCapabilities.xml"),
            )))
    }

    /// Render the Capabilities document
    pub fn to_xml(&self) -> Result<String> {
        Ok(self.to_element()?.to_document())
    }

    fn service_identification(&self) -> Element {
        Element::new("ows:ServiceIdentification")
            .text_child("ows:Title", "xcube WMTS")
            .text_child(
                "ows:Abstract",
                "Web Map Tile Service (WMTS) for xcube-conformant data cubes",
            )
            .child(Element::new("ows:Keywords").children(
                ["tile", "tile matrix set", "map"].map(|k| Element::text_element("ows:Keyword", k)),
            ))
            .text_child("ows:ServiceType", "OGC WMTS")
            .text_child("ows:ServiceTypeVersion", WMTS_VERSION)
            .text_child("ows:Fees", "none")
            .text_child("ows:AccessConstraints", "none")
    }

    fn service_provider(&self) -> Element {
        let p = &self.options.service_provider;
        Element::new("ows:ServiceProvider")
            .text_child("ows:ProviderName", &p.provider_name)
            .child(Element::new("ows:ProviderSite").attr("xlink:href", &p.provider_site))
            .child(
                Element::new("ows:ServiceContact")
                    .text_child("ows:IndividualName", &p.individual_name)
                    .text_child("ows:PositionName", &p.position_name)
                    .child(
                        Element::new("ows:ContactInfo")
                            .child(Element::new("ows:Phone").text_child("ows:Voice", &p.phone_voice))
                            .child(
                                Element::new("ows:Address")
                                    .text_child("ows:DeliveryPoint", &p.delivery_point)
                                    .text_child("ows:City", &p.city)
                                    .text_child("ows:PostalCode", &p.postal_code)
                                    .text_child("ows:Country", &p.country)
                                    .text_child(
                                        "ows:ElectronicMailAddress",
                                        &p.electronic_mail_address,
                                    ),
                            ),
                    ),
            )
    }

    fn operations_metadata(&self) -> Element {
        let base_url = self.base_url();
        let get = |href: String, encoding: &str| {
            Element::new("ows:Get").attr("xlink:href", href).child(
                Element::new("ows:Constraint")
                    .attr("name", "GetEncoding")
                    .child(
                        Element::new("ows:AllowedValues").text_child("ows:Value", encoding),
                    ),
            )
        };
        let operation = |name: &str, rest_path: &str| {
            Element::new("ows:Operation").attr("name", name).child(
                Element::new("ows:DCP").child(
                    Element::new("ows:HTTP")
                        .child(get(format!("{base_url}/wmts/kvp?"), "KVP"))
                        .child(get(format!("{base_url}/wmts/{WMTS_VERSION}/{rest_path}"), "REST")),
                ),
            )
        };
        Element::new("ows:OperationsMetadata")
            .child(operation("GetCapabilities", "WMTSCapabilities.xml"))
            .child(operation("GetTile", "tile/"))
    }

    fn contents(&self) -> Result<Element> {
        let mut contents = Element::new("Contents");
        let mut max_levels = vec![0usize; self.schemes.len()];
        for dataset in self.datasets {
            let (lon0, lat0, lon1, lat1) = dataset.wgs84_bbox()?;
            for (i, scheme) in self.schemes.iter().enumerate() {
                let (_, max_level) = dataset.tile_levels(scheme)?;
                max_levels[i] = max_levels[i].max(max_level);
            }
            for var in &dataset.variables {
                contents = contents.child(self.layer(dataset, var, (lon0, lat0, lon1, lat1)));
            }
        }
        for (scheme, max_level) in self.schemes.iter().zip(max_levels) {
            contents = contents.child(tile_matrix_set(scheme, max_level));
        }
        Ok(contents)
    }

    fn layer(
        &self,
        dataset: &LayerDataset,
        var: &LayerVariable,
        bbox: (f64, f64, f64, f64),
    ) -> Element {
        let base_url = self.base_url();
        let identifier = format!("{}.{}", dataset.ds_id, var.name);
        let mut layer = Element::new("Layer")
            .text_child("ows:Identifier", &identifier)
            .text_child("ows:Title", format!("{} - {}", dataset.title, var.title))
            .text_child("ows:Abstract", &var.abstract_text)
            .child(
                Element::new("ows:WGS84BoundingBox")
                    .text_child("ows:LowerCorner", format!("{} {}", bbox.0, bbox.1))
                    .text_child("ows:UpperCorner", format!("{} {}", bbox.2, bbox.3)),
            )
            .child(
                Element::new("Style")
                    .attr("isDefault", "true")
                    .text_child("ows:Identifier", "Default"),
            )
            .text_child("Format", TILE_FORMAT)
            .children(self.schemes.iter().map(|scheme| {
                Element::new("TileMatrixSetLink").text_child("TileMatrixSet", scheme.identifier)
            }))
            .child(
                Element::new("ResourceURL")
                    .attr("format", TILE_FORMAT)
                    .attr("resourceType", "tile")
                    .attr(
                        "template",
                        format!(
                            "{base_url}/wmts/{WMTS_VERSION}/tile/{}/{}/{{TileMatrixSet}}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.png",
                            dataset.ds_id, var.name
                        ),
                    ),
            );
        if let Some(last) = dataset.time_labels.last() {
            layer = layer.child(
                Element::new("Dimension")
                    .text_child("ows:Identifier", "time")
                    .text_child("ows:Title", "time")
                    .text_child("ows:UOM", "ISO8601")
                    .text_child("Default", format_datetime(last))
                    .text_child("Current", "true")
                    .children(
                        dataset
                            .time_labels
                            .iter()
                            .map(|t| Element::text_element("Value", format_datetime(t))),
                    ),
            );
        }
        layer
    }

    fn themes(&self) -> Element {
        Element::new("Themes").children(self.datasets.iter().map(|dataset| {
            Element::new("Theme")
                .text_child("ows:Title", &dataset.title)
                .text_child("ows:Abstract", "")
                .text_child("ows:Identifier", &dataset.ds_id)
                .children(dataset.variables.iter().map(|var| {
                    let identifier = format!("{}.{}", dataset.ds_id, var.name);
                    Element::new("Theme")
                        .text_child("ows:Title", &var.title)
                        .text_child("ows:Abstract", &var.abstract_text)
                        .text_child("ows:Identifier", &identifier)
                        .text_child("LayerRef", &identifier)
                }))
        }))
    }
}

fn tile_matrix_set(scheme: &TilingScheme, max_level: usize) -> Element {
    let (x0, y1) = scheme.top_left_corner();
    Element::new("TileMatrixSet")
        .text_child("ows:Identifier", scheme.identifier)
        .text_child("ows:Title", scheme.identifier)
        .text_child("ows:SupportedCRS", scheme.crs_urn())
        .text_child("WellKnownScaleSet", scheme.well_known_scale_set)
        .children((0..=max_level).map(|level| {
            let (matrix_width, matrix_height) = scheme.num_tiles(level);
            Element::new("TileMatrix")
                .text_child("ows:Identifier", scheme.tile_matrix_id(level))
                .text_child("ScaleDenominator", scheme.scale_denominator(level))
                .text_child("TopLeftCorner", format!("{x0} {y1}"))
                .text_child("TileWidth", scheme.tile_size)
                .text_child("TileHeight", scheme.tile_size)
                .text_child("MatrixWidth", matrix_width)
                .text_child("MatrixHeight", matrix_height)
        }))
}

/// Collect the layer datasets of all visible configured datasets
pub async fn get_layer_datasets(ctx: &DatasetsContext) -> ApiResult<Vec<LayerDataset>> {
    let mut layer_datasets = Vec::new();
    for ds_config in ctx.get_dataset_configs() {
        if ds_config.hidden {
            continue;
        }
        let ml_dataset = ctx.get_ml_dataset(&ds_config.identifier).await?;
        let dataset = ml_dataset.get_dataset(0).await?;
        let layer_dataset = LayerDataset::from_dataset(
            ds_config.identifier.clone(),
            ds_config.title.clone(),
            &dataset,
            ml_dataset.grid_mapping().clone(),
            ml_dataset.num_levels(),
        )?;
        if let Err(e) = layer_dataset.wgs84_bbox() {
            warn!("skipping dataset {:?} in WMTS: {e}", ds_config.identifier);
            continue;
        }
        layer_datasets.push(layer_dataset);
    }
    Ok(layer_datasets)
}

/// Capabilities XML of all visible datasets
pub async fn get_wmts_capabilities_xml(ctx: &DatasetsContext, base_url: &str) -> ApiResult<String> {
    let config = ctx.config();
    let options = WmtsOptions {
        base_url: format!("{}{}", base_url.trim_end_matches('/'), config.reverse_url_prefix()),
        service_provider: config.service_provider.clone().unwrap_or_default(),
        ..WmtsOptions::default()
    };
    let datasets = get_layer_datasets(ctx).await?;
    Ok(WmtsCapabilities::new(&datasets, &options)?.to_xml()?)
}
