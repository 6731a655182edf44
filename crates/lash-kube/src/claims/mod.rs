//! Configuration claims
//!
//! A claim is the user-facing object that carries the platform's
//! configuration values. Every claim kind implements [`ManagedResource`];
//! applying and waiting are written once against the trait here, and the
//! teardown removes claims through `DeleteSpec::claim`.

pub mod fields;
pub mod values;

use std::time::Duration;

use kube::api::DynamicObject;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ResourceClient;
use crate::error::Result;
use crate::kinds::{CORE_CLAIM, GITOPS_CLAIM, KindRef};
use crate::object::{ObjectExt, new_object};
use crate::watch::{WatchTarget, conditions, watch_until};

pub use fields::{Field, FieldType, spec_fields};
pub use values::{parse_set_values, typed_value};

/// Name of the XRD describing the Core claim's spec
pub const CORE_XRD_NAME: &str = "cores.pkg.platformnow.io";

/// A claim kind the drivers can apply and delete
pub trait ManagedResource: Send + Sync {
    /// Kind of the claim, with plural and scope
    fn kind_ref(&self) -> KindRef;

    /// Name of this claim instance, [`default_name`](Self::default_name) unless renamed
    fn name(&self) -> &str;

    /// Name used when none is given
    fn default_name(&self) -> &'static str;

    /// Object carrying `data` as its `spec`
    fn to_object(&self, data: &JsonValue) -> Result<DynamicObject> {
        let mut object = new_object(self.name(), None);
        object.types = Some(self.kind_ref().type_meta());
        object.set_field(&["spec"], data.clone())?;
        Ok(object)
    }
}

/// Claim of the base platform module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Core {
    name: Option<String>,
}

impl Core {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl ManagedResource for Core {
    fn kind_ref(&self) -> KindRef {
        CORE_CLAIM.kind_ref()
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.default_name())
    }

    fn default_name(&self) -> &'static str {
        "core"
    }
}

/// Claim of the gitops module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gitops {
    name: Option<String>,
}

impl Gitops {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl ManagedResource for Gitops {
    fn kind_ref(&self) -> KindRef {
        GITOPS_CLAIM.kind_ref()
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.default_name())
    }

    fn default_name(&self) -> &'static str {
        "gitops"
    }
}

/// Apply `data` as the claim's spec
pub async fn apply_claim<C>(client: &C, claim: &dyn ManagedResource, data: &JsonValue) -> Result<()>
where
    C: ResourceClient + ?Sized,
{
    let object = claim.to_object(data)?;
    client.apply(&object, &claim.kind_ref()).await?;
    debug!(kind = %claim.kind_ref(), name = claim.name(), "claim applied");
    Ok(())
}

/// Wait for the claim to report `Ready=True`
pub async fn wait_until_ready<C>(
    client: &C,
    claim: &dyn ManagedResource,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<()>
where
    C: ResourceClient + ?Sized,
{
    let target = WatchTarget::new(claim.kind_ref());
    let predicate = conditions::named(claim.name().to_string(), conditions::all_true(&["Ready"]));
    watch_until(client, &target, predicate, cancel, timeout).await
}
