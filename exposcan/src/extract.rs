use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{self, ComponentElement, Manifest};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to decode manifest: {0}")]
    Decode(crate::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("no <application> element in manifest for {0}")]
    MissingApplication(String),

    #[error("{0}")]
    IO(#[from] std::io::Error),
}

/// A permission declared with `<permission>` somewhere in the package set
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DefinedPermission {
    pub name: String,

    #[serde(rename = "protectionLevel", default)]
    pub protection_level: Option<String>,
}

/// A `<path-permission>` override, blank fields omitted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PathPermission {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,

    #[serde(
        rename = "pathPrefix",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub path_prefix: Option<String>,

    #[serde(
        rename = "pathPattern",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub path_pattern: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub permission: Option<String>,

    #[serde(
        rename = "readPermission",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub read_permission: Option<String>,

    #[serde(
        rename = "writePermission",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub write_permission: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComponentKind {
    Activity,
    Service,
    Receiver {
        #[serde(default)]
        actions: Vec<String>,
    },
    Provider {
        #[serde(rename = "readPermission", default)]
        read_permission: Option<String>,

        #[serde(rename = "writePermission", default)]
        write_permission: Option<String>,

        #[serde(rename = "path_permission", default)]
        path_permissions: Vec<PathPermission>,
    },
}

/// An exported component and the permissions guarding it
///
/// Non-exported components never make it into the model; everything here is
/// part of the package's attack surface.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Component {
    /// `package/class` name
    pub name: String,

    #[serde(default)]
    pub permission: Option<String>,

    #[serde(flatten)]
    pub kind: ComponentKind,
}

/// Everything the exposure analysis needs to know about one APK
///
/// Built once per manifest and immutable afterwards. Serializable so that a
/// scan over a large firmware dump can be cached and re-analyzed without
/// re-decoding every APK.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PackageModel {
    pub package: String,

    /// The APK the model was extracted from
    pub source: PathBuf,

    pub defined_permissions: Vec<DefinedPermission>,

    pub uses_permissions: Vec<String>,

    pub protected_broadcasts: Vec<String>,

    pub components: Vec<Component>,
}

/// Blank attribute values mean the same thing as absent ones
fn non_blank(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(String::from)
}

fn push_components<E, F>(into: &mut Vec<Component>, package: &str, elements: &[E], kind: F)
where
    E: ComponentElement,
    F: Fn(&E) -> ComponentKind,
{
    for element in elements {
        if !element.exported() {
            continue;
        }

        let name = match element.name().filter(|n| !n.is_empty()) {
            Some(n) => n,
            None => {
                log::warn!("skipping component without android:name in {}", package);
                continue;
            }
        };

        into.push(Component {
            name: format!("{}/{}", package, name),
            permission: non_blank(element.permission()),
            kind: kind(element),
        });
    }
}

fn path_permission_of(element: &manifest::PathPermissionElement) -> PathPermission {
    PathPermission {
        path: non_blank(element.path()),
        path_prefix: non_blank(element.path_prefix()),
        path_pattern: non_blank(element.path_pattern()),
        permission: non_blank(element.permission()),
        read_permission: non_blank(element.read_permission()),
        write_permission: non_blank(element.write_permission()),
    }
}

fn action_names(receiver: &manifest::Receiver) -> Vec<String> {
    receiver
        .intent_filters
        .iter()
        .flat_map(|f| f.get_actions())
        .map(|a| a.name().to_string())
        .collect()
}

/// Turn a parsed manifest into the model consumed by the classifier
pub fn extract(source: &Path, manifest: &Manifest) -> Result<PackageModel, ExtractError> {
    let package = manifest.package().to_string();

    let app = manifest
        .application()
        .ok_or_else(|| ExtractError::MissingApplication(package.clone()))?;

    let defined_permissions = manifest
        .get_permissions()
        .iter()
        .map(|p| DefinedPermission {
            name: p.name().into(),
            protection_level: non_blank(p.protection_level()),
        })
        .collect();

    let uses_permissions = manifest
        .get_uses_permissions()
        .iter()
        .map(|p| p.name().to_string())
        .collect();

    let protected_broadcasts = manifest
        .get_protected_broadcasts()
        .iter()
        .map(|p| p.name().to_string())
        .collect();

    let mut components = Vec::new();

    push_components(&mut components, &package, app.activities.as_slice(), |_| {
        ComponentKind::Activity
    });
    push_components(&mut components, &package, app.services.as_slice(), |_| {
        ComponentKind::Service
    });
    push_components(&mut components, &package, app.providers.as_slice(), |p| {
        ComponentKind::Provider {
            read_permission: non_blank(p.read_permission()),
            write_permission: non_blank(p.write_permission()),
            path_permissions: p.path_permissions.iter().map(path_permission_of).collect(),
        }
    });
    push_components(&mut components, &package, app.receivers.as_slice(), |r| {
        ComponentKind::Receiver {
            actions: action_names(r),
        }
    });

    Ok(PackageModel {
        package,
        source: source.into(),
        defined_permissions,
        uses_permissions,
        protected_broadcasts,
        components,
    })
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.test.app">

    <uses-permission android:name="android.permission.INTERNET" />

    <permission
        android:name="com.test.app.PERM"
        android:protectionLevel="0x00000002" />

    <protected-broadcast android:name="com.test.app.SAFE_ACTION" />

    <application>
        <activity android:name="com.test.app.Hidden" android:exported="false" />
        <activity android:name="com.test.app.Main" android:exported="true"
            android:permission="com.test.app.PERM" />
        <activity android:exported="true" />

        <service android:name=".Svc">
            <intent-filter>
                <action android:name="com.test.app.START" />
            </intent-filter>
        </service>

        <provider
            android:name=".Prov"
            android:authorities="com.test.app.prov"
            android:exported="true"
            android:readPermission="com.test.app.READ"
            android:writePermission="" />

        <receiver android:name=".Rcv" android:exported="true">
            <intent-filter>
                <action android:name="com.test.app.SAFE_ACTION" />
            </intent-filter>
            <intent-filter>
                <action android:name="com.test.app.OTHER_ACTION" />
            </intent-filter>
        </receiver>
    </application>

</manifest>
"#;

    fn extract_str(raw: &str) -> Result<PackageModel, ExtractError> {
        let manifest = Manifest::from_str(raw).expect("manifest should parse");
        extract(&PathBuf::from("/t/test.apk"), &manifest)
    }

    #[test]
    fn test_extract() {
        let model = extract_str(MANIFEST).expect("extraction should succeed");

        assert_eq!(model.package, "com.test.app");
        assert_eq!(model.uses_permissions, vec!["android.permission.INTERNET"]);
        assert_eq!(model.protected_broadcasts, vec!["com.test.app.SAFE_ACTION"]);
        assert_eq!(
            model.defined_permissions,
            vec![DefinedPermission {
                name: "com.test.app.PERM".into(),
                protection_level: Some("0x00000002".into()),
            }]
        );

        // Hidden is not exported and the unnamed activity is dropped
        let names: Vec<&str> = model.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "com.test.app/com.test.app.Main",
                "com.test.app/.Svc",
                "com.test.app/.Prov",
                "com.test.app/.Rcv",
            ]
        );

        let main = &model.components[0];
        assert_eq!(main.permission.as_deref(), Some("com.test.app.PERM"));
        assert_eq!(main.kind, ComponentKind::Activity);

        let prov = &model.components[2];
        match &prov.kind {
            ComponentKind::Provider {
                read_permission,
                write_permission,
                path_permissions,
            } => {
                assert_eq!(read_permission.as_deref(), Some("com.test.app.READ"));
                assert_eq!(write_permission.as_deref(), None, "blank is absent");
                assert!(path_permissions.is_empty());
            }
            other => panic!("expected a provider, got {:?}", other),
        }

        let rcv = &model.components[3];
        match &rcv.kind {
            ComponentKind::Receiver { actions } => {
                assert_eq!(
                    actions,
                    &vec![
                        String::from("com.test.app.SAFE_ACTION"),
                        String::from("com.test.app.OTHER_ACTION"),
                    ]
                );
            }
            other => panic!("expected a receiver, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_application() {
        let res = extract_str(
            r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"
                package="com.test.app" />"#,
        );
        match res {
            Err(ExtractError::MissingApplication(pkg)) => assert_eq!(pkg, "com.test.app"),
            other => panic!("expected MissingApplication, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_model_round_trip() {
        let model = extract_str(MANIFEST).expect("extraction should succeed");
        let as_json = serde_json::to_string(&model).expect("model serializes");
        let back: PackageModel = serde_json::from_str(&as_json).expect("model deserializes");

        assert_eq!(back.package, model.package);
        assert_eq!(back.defined_permissions, model.defined_permissions);
        assert_eq!(back.protected_broadcasts, model.protected_broadcasts);
        assert_eq!(back.components, model.components);
    }
}
