//! The ImageMap object (read-only input)

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ApiObject;

/// Output record of the build engine for one image
///
/// When `buildStartTime` advances, every file event that predates the new
/// build is considered consumed by the image itself and must never be
/// live-updated again.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMap {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Image selection, owned by the build engine
    #[serde(default)]
    pub spec: ImageMapSpec,

    /// Build output
    #[serde(default)]
    pub status: ImageMapStatus,
}

impl ApiObject for ImageMap {
    const KIND: &'static str = "ImageMap";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Desired state of an ImageMap (opaque to this engine)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMapSpec {
    /// Image reference the build engine matches against configuration
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}

/// Observed state of an ImageMap
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMapStatus {
    /// Image reference as built locally
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Image reference as visible from inside the cluster; this is what
    /// container images are matched against
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_from_cluster: String,

    /// When the most recent build of this image started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_start_time: Option<MicroTime>,
}
