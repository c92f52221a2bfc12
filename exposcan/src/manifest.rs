use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::utils::{open_file, path_must_str};

/// An app component element: activity, service, receiver or provider.
///
/// These all share the attributes the exposure analysis cares about; the
/// concrete structs add their type-specific extras on top.
pub trait ComponentElement {
    /// The `android:name` attribute, if present
    ///
    /// Class names are often given relative to the manifest package
    /// (`.ClassName`); callers that need a full name must join it with
    /// [Manifest::package] themselves.
    fn name(&self) -> Option<&str>;

    /// Whether the component is reachable from other applications
    ///
    /// An explicit `android:exported` value wins. When the attribute is
    /// absent (or holds something other than a boolean literal), the
    /// component is exported iff it declares at least one intent-filter.
    fn exported(&self) -> bool;

    /// The `android:permission` attribute, if present
    fn permission(&self) -> Option<&str>;

    fn intent_filters(&self) -> &[IntentFilter];
}

#[derive(Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Action {
    #[serde(rename = "@name", default)]
    name: String,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Deserialize)]
pub struct IntentFilter {
    #[serde(rename = "action", default = "Vec::new")]
    actions: Vec<Action>,
}

impl IntentFilter {
    pub fn get_actions(&self) -> &[Action] {
        self.actions.as_slice()
    }
}

macro_rules! def_component {
    ($name:ident) => {
        def_component!($name {});
    };
    ($name:ident { $($rem:tt)* }) => {
        #[derive(Deserialize)]
        pub struct $name {
            #[serde(rename = "@name")]
            name: Option<String>,

            #[serde(rename = "@exported")]
            exported: Option<String>,

            #[serde(rename = "@permission")]
            permission: Option<String>,

            #[serde(rename = "intent-filter", default = "Vec::new")]
            pub intent_filters: Vec<IntentFilter>,

            $($rem)*
        }

        impl ComponentElement for $name {
            fn name(&self) -> Option<&str> {
                self.name.as_deref()
            }

            fn exported(&self) -> bool {
                match self.exported.as_deref() {
                    Some("true") => true,
                    Some("false") => false,
                    _ => !self.intent_filters.is_empty(),
                }
            }

            fn permission(&self) -> Option<&str> {
                self.permission.as_deref()
            }

            fn intent_filters(&self) -> &[IntentFilter] {
                self.intent_filters.as_slice()
            }
        }
    };
}

def_component!(Activity);
def_component!(Receiver);
def_component!(Service);
def_component!(Provider {
    #[serde(rename = "@readPermission")]
    read_permission: Option<String>,

    #[serde(rename = "@writePermission")]
    write_permission: Option<String>,

    #[serde(rename = "path-permission", default = "Vec::new")]
    pub path_permissions: Vec<PathPermissionElement>,
});

impl Provider {
    /// The `android:readPermission` attribute, if present
    ///
    /// Note that an absent read permission does not fall back to the base
    /// permission here; the analysis treats each field on its own.
    pub fn read_permission(&self) -> Option<&str> {
        self.read_permission.as_deref()
    }

    pub fn write_permission(&self) -> Option<&str> {
        self.write_permission.as_deref()
    }
}

/// A `<path-permission>` child of a `<provider>`
///
/// Narrows access requirements for a sub-tree of the provider's paths. At
/// most one of the three path selectors is normally present.
#[derive(Deserialize)]
pub struct PathPermissionElement {
    #[serde(rename = "@path")]
    path: Option<String>,

    #[serde(rename = "@pathPrefix")]
    path_prefix: Option<String>,

    #[serde(rename = "@pathPattern")]
    path_pattern: Option<String>,

    #[serde(rename = "@permission")]
    permission: Option<String>,

    #[serde(rename = "@readPermission")]
    read_permission: Option<String>,

    #[serde(rename = "@writePermission")]
    write_permission: Option<String>,
}

impl PathPermissionElement {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    pub fn path_pattern(&self) -> Option<&str> {
        self.path_pattern.as_deref()
    }

    pub fn permission(&self) -> Option<&str> {
        self.permission.as_deref()
    }

    pub fn read_permission(&self) -> Option<&str> {
        self.read_permission.as_deref()
    }

    pub fn write_permission(&self) -> Option<&str> {
        self.write_permission.as_deref()
    }
}

#[derive(Deserialize)]
pub struct Application {
    #[serde(rename = "activity", default = "Vec::new")]
    pub activities: Vec<Activity>,

    #[serde(rename = "provider", default = "Vec::new")]
    pub providers: Vec<Provider>,

    #[serde(rename = "receiver", default = "Vec::new")]
    pub receivers: Vec<Receiver>,

    #[serde(rename = "service", default = "Vec::new")]
    pub services: Vec<Service>,
}

#[cfg_attr(test, derive(Debug, PartialEq))]
#[derive(Deserialize)]
pub struct UsesPermission {
    #[serde(rename = "@name", default)]
    name: String,
}

impl UsesPermission {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S> PartialEq<S> for UsesPermission
where
    S: AsRef<str>,
{
    fn eq(&self, other: &S) -> bool {
        self.name == other.as_ref()
    }
}

#[cfg_attr(test, derive(Debug, PartialEq))]
#[derive(Deserialize)]
pub struct ProtectedBroadcast {
    #[serde(rename = "@name", default)]
    name: String,
}

impl ProtectedBroadcast {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg_attr(test, derive(Debug, PartialEq))]
#[derive(Deserialize)]
pub struct Permission {
    #[serde(rename = "@name", default)]
    name: String,

    #[serde(rename = "@protectionLevel")]
    protection_level: Option<String>,
}

impl Permission {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw `android:protectionLevel` value
    ///
    /// Decoded manifests carry this either as a hex flag word (`0x00000002`)
    /// or as a readable level name, so interpretation is left to the caller.
    pub fn protection_level(&self) -> Option<&str> {
        self.protection_level.as_deref()
    }
}

impl<S> PartialEq<S> for Permission
where
    S: AsRef<str>,
{
    fn eq(&self, other: &S) -> bool {
        self.name == other.as_ref()
    }
}

/// An incomplete but sufficient for our purposes Android Manifest type
///
/// This expects the textual XML form of a manifest, so binary manifests have
/// to go through an AXML decoder first. Values are stored exactly as they
/// appear in the document.
#[derive(Deserialize)]
pub struct Manifest {
    #[serde(rename = "@package", default)]
    package: String,

    #[serde(rename = "uses-permission", default = "Vec::new")]
    pub uses_permissions: Vec<UsesPermission>,

    #[serde(rename = "permission", default = "Vec::new")]
    pub permissions: Vec<Permission>,

    #[serde(rename = "protected-broadcast", default = "Vec::new")]
    pub protected_broadcasts: Vec<ProtectedBroadcast>,

    pub application: Option<Application>,
}

impl Manifest {
    /// Parse an AndroidManifest.xml file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = match open_file(path) {
            Ok(v) => v,
            Err(e) => {
                log::error!("failed to open {}: {}", path_must_str(path), e);
                return Err(e.into());
            }
        };
        let mut br = BufReader::new(file);
        let manifest: Self = match quick_xml::de::from_reader(&mut br) {
            Ok(v) => v,
            Err(e) => {
                log::error!("failed to deserialize {}: {}", path_must_str(path), e);
                return Err(e.into());
            }
        };
        Ok(manifest)
    }

    pub fn from_str(raw: &str) -> anyhow::Result<Self> {
        Ok(quick_xml::de::from_str(raw)?)
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn application(&self) -> Option<&Application> {
        self.application.as_ref()
    }

    pub fn get_permissions(&self) -> &[Permission] {
        self.permissions.as_slice()
    }

    pub fn get_uses_permissions(&self) -> &[UsesPermission] {
        self.uses_permissions.as_slice()
    }

    pub fn get_protected_broadcasts(&self) -> &[ProtectedBroadcast] {
        self.protected_broadcasts.as_slice()
    }
}
