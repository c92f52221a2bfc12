use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::extract::{Component, ComponentKind, DefinedPermission, PackageModel, PathPermission};

// https://developer.android.com/reference/android/R.attr#protectionLevel
const PROTECTION_SIGNATURE: u32 = 0x2;
const PROTECTION_INTERNAL: u32 = 0x4;
const PROTECTION_SYSTEM: u32 = 0x10;

/// How a declared permission's `protectionLevel` is judged
///
/// Firmware manifests come out of AXML decoders in two shapes: a hex flag
/// word (`0x00000012`) or a readable level name (`signature|privileged`).
/// The two interpretations below do not agree on every input, so the choice
/// is left to whoever configures the analysis rather than baked in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegeRule {
    /// Decode the level as a hex flag word; the signature, internal and
    /// system base types count as privileged
    ProtectionFlags,

    /// Readable level names; `normal` and `dangerous` are unprivileged and
    /// everything else counts as privileged
    ProtectionNames,
}

impl PrivilegeRule {
    pub fn is_privileged(&self, permission: &DefinedPermission) -> bool {
        let level = match permission.protection_level.as_deref() {
            None => return false,
            Some(v) if v.is_empty() => return false,
            Some(v) => v,
        };

        match self {
            Self::ProtectionFlags => {
                let trimmed = level.trim_start_matches("0x").trim_start_matches("0X");
                let bits = match u32::from_str_radix(trimmed, 16) {
                    Ok(v) => v,
                    Err(_) => {
                        log::warn!(
                            "protectionLevel `{}` of {} is not a flag word",
                            level,
                            permission.name
                        );
                        return false;
                    }
                };
                // Only the base protection types matter here; the additional
                // flag bits are ignored.
                bits & PROTECTION_SIGNATURE == PROTECTION_SIGNATURE
                    || bits & PROTECTION_INTERNAL == PROTECTION_INTERNAL
                    || bits & PROTECTION_SYSTEM == PROTECTION_SYSTEM
            }
            Self::ProtectionNames => !matches!(level, "normal" | "dangerous"),
        }
    }
}

impl FromStr for PrivilegeRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "protection-flags" => Ok(Self::ProtectionFlags),
            "protection-names" => Ok(Self::ProtectionNames),
            other => Err(format!(
                "unknown privilege rule `{}` (expected protection-flags or protection-names)",
                other
            )),
        }
    }
}

/// Resolution of one permission reference against the merged universe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Referenced by name but declared nowhere in the package set
    Undefined,
    /// Blank, or declared without a privileged protection level
    Unprivileged,
    Privileged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueKind {
    Undefined,
    Unprivileged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Activity,
    Service,
    Provider,
    Receiver,
}

impl ComponentType {
    pub fn of(kind: &ComponentKind) -> Self {
        match kind {
            ComponentKind::Activity => Self::Activity,
            ComponentKind::Service => Self::Service,
            ComponentKind::Provider { .. } => Self::Provider,
            ComponentKind::Receiver { .. } => Self::Receiver,
        }
    }
}

/// A component that ended up in a result set
///
/// Blank guard fields are reported as empty strings; fields that don't
/// apply to the component's type are omitted entirely.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Flagged {
    pub name: String,

    pub permission: String,

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

    #[serde(
        rename = "path_permission",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub path_permissions: Option<Vec<PathPermission>>,
}

impl Flagged {
    fn of(component: &Component) -> Self {
        let permission = component.permission.clone().unwrap_or_default();
        match &component.kind {
            ComponentKind::Provider {
                read_permission,
                write_permission,
                path_permissions,
            } => Self {
                name: component.name.clone(),
                permission,
                read_permission: Some(read_permission.clone().unwrap_or_default()),
                write_permission: Some(write_permission.clone().unwrap_or_default()),
                path_permissions: Some(path_permissions.clone()),
            },
            _ => Self {
                name: component.name.clone(),
                permission,
                read_permission: None,
                write_permission: None,
                path_permissions: None,
            },
        }
    }
}

/// Flagged components of one issue kind, grouped by component type
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GroupedComponents {
    #[serde(rename = "activity", default)]
    pub activities: Vec<Flagged>,

    #[serde(rename = "service", default)]
    pub services: Vec<Flagged>,

    #[serde(rename = "provider", default)]
    pub providers: Vec<Flagged>,

    #[serde(rename = "receiver", default)]
    pub receivers: Vec<Flagged>,
}

impl GroupedComponents {
    pub fn of(&self, ty: ComponentType) -> &[Flagged] {
        match ty {
            ComponentType::Activity => self.activities.as_slice(),
            ComponentType::Service => self.services.as_slice(),
            ComponentType::Provider => self.providers.as_slice(),
            ComponentType::Receiver => self.receivers.as_slice(),
        }
    }

    fn of_mut(&mut self, ty: ComponentType) -> &mut Vec<Flagged> {
        match ty {
            ComponentType::Activity => &mut self.activities,
            ComponentType::Service => &mut self.services,
            ComponentType::Provider => &mut self.providers,
            ComponentType::Receiver => &mut self.receivers,
        }
    }

    pub fn len(&self) -> usize {
        self.activities.len() + self.services.len() + self.providers.len() + self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The full result of classifying a package set
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Classification {
    #[serde(rename = "undefined_permissions")]
    pub undefined: GroupedComponents,

    #[serde(rename = "unprivileged_permissions")]
    pub unprivileged: GroupedComponents,
}

impl Classification {
    fn add(&mut self, ty: ComponentType, kind: IssueKind, flagged: Flagged) {
        self.group_mut(kind).of_mut(ty).push(flagged);
    }

    pub fn group(&self, kind: IssueKind) -> &GroupedComponents {
        match kind {
            IssueKind::Undefined => &self.undefined,
            IssueKind::Unprivileged => &self.unprivileged,
        }
    }

    fn group_mut(&mut self, kind: IssueKind) -> &mut GroupedComponents {
        match kind {
            IssueKind::Undefined => &mut self.undefined,
            IssueKind::Unprivileged => &mut self.unprivileged,
        }
    }

    pub fn get(&self, ty: ComponentType, kind: IssueKind) -> &[Flagged] {
        self.group(kind).of(ty)
    }

    pub fn total(&self) -> usize {
        self.undefined.len() + self.unprivileged.len()
    }
}

/// Judges exported components against the merged permission universe
///
/// Built once per analysis from every model in the package set, since a
/// component in one package is regularly guarded by a permission that only
/// the platform package declares.
pub struct Classifier {
    rule: PrivilegeRule,
    defined: HashMap<String, DefinedPermission>,
    protected_broadcasts: HashSet<String>,
}

impl Classifier {
    pub fn new(rule: PrivilegeRule, models: &[PackageModel]) -> Self {
        let mut defined = HashMap::new();
        for p in models.iter().flat_map(|m| m.defined_permissions.iter()) {
            // The first declaration of a name wins across the merged set
            defined
                .entry(p.name.clone())
                .or_insert_with(|| p.clone());
        }

        let protected_broadcasts = models
            .iter()
            .flat_map(|m| m.protected_broadcasts.iter().cloned())
            .collect();

        Self {
            rule,
            defined,
            protected_broadcasts,
        }
    }

    pub fn status(&self, permission: Option<&str>) -> PermissionStatus {
        let name = match permission.filter(|p| !p.is_empty()) {
            // An unguarded surface is treated like one guarded by an
            // unprivileged permission
            None => return PermissionStatus::Unprivileged,
            Some(v) => v,
        };

        match self.defined.get(name) {
            None => PermissionStatus::Undefined,
            Some(def) => {
                if self.rule.is_privileged(def) {
                    PermissionStatus::Privileged
                } else {
                    PermissionStatus::Unprivileged
                }
            }
        }
    }

    /// Decide whether a single exported component belongs in a result set
    pub fn classify_component(&self, component: &Component) -> Option<IssueKind> {
        match &component.kind {
            ComponentKind::Provider {
                read_permission,
                write_permission,
                path_permissions,
            } => self.classify_provider(
                component.permission.as_deref(),
                read_permission.as_deref(),
                write_permission.as_deref(),
                path_permissions,
            ),
            ComponentKind::Receiver { actions } => {
                // The platform refuses to deliver protected actions from
                // third-party senders, so a receiver listening only for
                // those is covered without any permission. Note that a
                // receiver with no actions at all is exempt as well.
                if actions.iter().all(|a| self.protected_broadcasts.contains(a)) {
                    return None;
                }
                self.classify_guarded(component.permission.as_deref())
            }
            _ => self.classify_guarded(component.permission.as_deref()),
        }
    }

    fn classify_guarded(&self, permission: Option<&str>) -> Option<IssueKind> {
        match self.status(permission) {
            PermissionStatus::Undefined => Some(IssueKind::Undefined),
            PermissionStatus::Unprivileged => Some(IssueKind::Unprivileged),
            PermissionStatus::Privileged => None,
        }
    }

    fn classify_provider(
        &self,
        permission: Option<&str>,
        read_permission: Option<&str>,
        write_permission: Option<&str>,
        path_permissions: &[PathPermission],
    ) -> Option<IssueKind> {
        use PermissionStatus::*;

        let base = self.status(permission);
        let read = self.status(read_permission);
        let write = self.status(write_permission);

        match base {
            Unprivileged => {
                if write == Undefined || read == Undefined {
                    return Some(IssueKind::Undefined);
                }
                if write == Unprivileged || read == Unprivileged {
                    return Some(IssueKind::Unprivileged);
                }
            }
            Undefined => {
                // A dangling base permission is reported as undefined as
                // soon as either access direction is less than privileged
                if write != Privileged || read != Privileged {
                    return Some(IssueKind::Undefined);
                }
            }
            Privileged => {}
        }

        // Path overrides can narrow a provider that looked safe above.
        //
        // TODO: the first offending field stops the walk, so additional
        //  offending path-permissions on the same provider go unreported.
        for pp in path_permissions {
            let fields = [
                pp.permission.as_deref(),
                pp.read_permission.as_deref(),
                pp.write_permission.as_deref(),
            ];
            for field in fields {
                let name = match field.filter(|f| !f.is_empty()) {
                    None => continue,
                    Some(v) => v,
                };
                match self.defined.get(name) {
                    None => return Some(IssueKind::Undefined),
                    Some(def) if !self.rule.is_privileged(def) => {
                        return Some(IssueKind::Unprivileged)
                    }
                    Some(_) => {}
                }
            }
        }

        None
    }
}

/// Classify a whole package set against its own merged permission universe
///
/// Results keep the encounter order of the input models.
pub fn classify_models(rule: PrivilegeRule, models: &[PackageModel]) -> Classification {
    let classifier = Classifier::new(rule, models);

    let mut result = Classification::default();
    for component in models.iter().flat_map(|m| m.components.iter()) {
        if let Some(kind) = classifier.classify_component(component) {
            result.add(
                ComponentType::of(&component.kind),
                kind,
                Flagged::of(component),
            );
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    fn perm(name: &str, level: Option<&str>) -> DefinedPermission {
        DefinedPermission {
            name: name.into(),
            protection_level: level.map(String::from),
        }
    }

    fn model(package: &str, perms: Vec<DefinedPermission>, components: Vec<Component>) -> PackageModel {
        PackageModel {
            package: package.into(),
            source: format!("/t/{}.apk", package).into(),
            defined_permissions: perms,
            uses_permissions: Vec::new(),
            protected_broadcasts: Vec::new(),
            components,
        }
    }

    fn activity(name: &str, permission: Option<&str>) -> Component {
        Component {
            name: name.into(),
            permission: permission.map(String::from),
            kind: ComponentKind::Activity,
        }
    }

    fn receiver(name: &str, permission: Option<&str>, actions: &[&str]) -> Component {
        Component {
            name: name.into(),
            permission: permission.map(String::from),
            kind: ComponentKind::Receiver {
                actions: actions.iter().map(|a| a.to_string()).collect(),
            },
        }
    }

    fn provider(
        name: &str,
        permission: Option<&str>,
        read: Option<&str>,
        write: Option<&str>,
        paths: Vec<PathPermission>,
    ) -> Component {
        Component {
            name: name.into(),
            permission: permission.map(String::from),
            kind: ComponentKind::Provider {
                read_permission: read.map(String::from),
                write_permission: write.map(String::from),
                path_permissions: paths,
            },
        }
    }

    fn path_perm(
        permission: Option<&str>,
        read: Option<&str>,
        write: Option<&str>,
    ) -> PathPermission {
        PathPermission {
            path_prefix: Some("/p".into()),
            permission: permission.map(String::from),
            read_permission: read.map(String::from),
            write_permission: write.map(String::from),
            ..PathPermission::default()
        }
    }

    #[rstest]
    #[case("0x2", true)]
    #[case("0x00000002", true)]
    #[case("0x00000012", true)]
    #[case("0x4", true)]
    #[case("0x10", true)]
    #[case("0x1", false)]
    #[case("0x0", false)]
    #[case("0x40", false)]
    #[case("2", true)]
    #[case("signature", false)]
    fn test_protection_flags_rule(#[case] level: &str, #[case] privileged: bool) {
        let rule = PrivilegeRule::ProtectionFlags;
        assert_eq!(rule.is_privileged(&perm("p.P", Some(level))), privileged);
    }

    #[rstest]
    #[case("signature", true)]
    #[case("signature|privileged", true)]
    #[case("signatureOrSystem", true)]
    #[case("internal", true)]
    #[case("normal", false)]
    #[case("dangerous", false)]
    fn test_protection_names_rule(#[case] level: &str, #[case] privileged: bool) {
        let rule = PrivilegeRule::ProtectionNames;
        assert_eq!(rule.is_privileged(&perm("p.P", Some(level))), privileged);
    }

    #[test]
    fn test_blank_level_never_privileged() {
        for rule in [PrivilegeRule::ProtectionFlags, PrivilegeRule::ProtectionNames] {
            assert!(!rule.is_privileged(&perm("p.P", None)));
            assert!(!rule.is_privileged(&perm("p.P", Some(""))));
        }
    }

    #[test]
    fn test_rule_from_str() {
        assert_eq!(
            "protection-flags".parse::<PrivilegeRule>(),
            Ok(PrivilegeRule::ProtectionFlags)
        );
        assert_eq!(
            "protection-names".parse::<PrivilegeRule>(),
            Ok(PrivilegeRule::ProtectionNames)
        );
        assert!("signature".parse::<PrivilegeRule>().is_err());
    }

    fn classify_one(perms: Vec<DefinedPermission>, component: Component) -> Classification {
        let models = vec![model("p", perms, vec![component])];
        classify_models(PrivilegeRule::ProtectionFlags, &models)
    }

    #[test]
    fn test_unguarded_component_is_unprivileged() {
        let res = classify_one(Vec::new(), activity("p/p.A", None));
        assert_eq!(res.get(ComponentType::Activity, IssueKind::Unprivileged).len(), 1);
        assert!(res.undefined.is_empty());
    }

    #[test]
    fn test_privileged_permission_is_safe() {
        let res = classify_one(
            vec![perm("com.x.PERM", Some("0x2"))],
            activity("p/p.A", Some("com.x.PERM")),
        );
        assert_eq!(res.total(), 0);
    }

    #[test]
    fn test_named_signature_permission_is_safe() {
        // Same manifest, readable-level decode: the names rule has to carry
        // through the whole classification
        let models = vec![model(
            "p",
            vec![perm("com.x.PERM", Some("signature"))],
            vec![activity("p/p.A", Some("com.x.PERM"))],
        )];
        let res = classify_models(PrivilegeRule::ProtectionNames, &models);
        assert_eq!(res.total(), 0);

        // The flag decode can't make sense of the same level and treats the
        // guard as unprivileged
        let res = classify_models(PrivilegeRule::ProtectionFlags, &models);
        assert_eq!(res.get(ComponentType::Activity, IssueKind::Unprivileged).len(), 1);
    }

    #[test]
    fn test_missing_permission_is_undefined() {
        let res = classify_one(Vec::new(), activity("p/p.A", Some("com.x.MISSING")));
        let flagged = res.get(ComponentType::Activity, IssueKind::Undefined);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].permission, "com.x.MISSING");
        assert!(res.unprivileged.is_empty());
    }

    #[test]
    fn test_normal_permission_is_unprivileged() {
        let res = classify_one(
            vec![perm("com.x.PERM", Some("0x1"))],
            activity("p/p.A", Some("com.x.PERM")),
        );
        assert_eq!(res.get(ComponentType::Activity, IssueKind::Unprivileged).len(), 1);
    }

    #[test]
    fn test_wide_open_provider_is_unprivileged() {
        let res = classify_one(Vec::new(), provider("p/p.P", None, None, None, Vec::new()));
        assert_eq!(res.get(ComponentType::Provider, IssueKind::Unprivileged).len(), 1);
    }

    #[test]
    fn test_provider_undefined_read_permission() {
        let res = classify_one(
            Vec::new(),
            provider("p/p.P", None, Some("com.x.R"), None, Vec::new()),
        );
        let flagged = res.get(ComponentType::Provider, IssueKind::Undefined);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].permission, "");
        assert_eq!(flagged[0].read_permission.as_deref(), Some("com.x.R"));
        assert_eq!(flagged[0].write_permission.as_deref(), Some(""));
        assert!(res.unprivileged.is_empty());
    }

    #[test]
    fn test_provider_undefined_base_with_unprivileged_read() {
        // The base permission is dangling; reads fall back to nothing
        let res = classify_one(
            Vec::new(),
            provider("p/p.P", Some("com.x.MISSING"), None, None, Vec::new()),
        );
        assert_eq!(res.get(ComponentType::Provider, IssueKind::Undefined).len(), 1);
    }

    #[test]
    fn test_provider_fully_privileged_is_safe() {
        let res = classify_one(
            vec![perm("com.x.PERM", Some("0x2"))],
            provider(
                "p/p.P",
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                Vec::new(),
            ),
        );
        assert_eq!(res.total(), 0);
    }

    #[test]
    fn test_path_permission_narrows_privileged_provider() {
        let res = classify_one(
            vec![
                perm("com.x.PERM", Some("0x2")),
                perm("com.x.WEAK", Some("0x0")),
            ],
            provider(
                "p/p.P",
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                vec![path_perm(None, Some("com.x.WEAK"), None)],
            ),
        );
        assert_eq!(res.get(ComponentType::Provider, IssueKind::Unprivileged).len(), 1);
    }

    #[test]
    fn test_path_permission_undefined() {
        let res = classify_one(
            vec![perm("com.x.PERM", Some("0x2"))],
            provider(
                "p/p.P",
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                vec![path_perm(Some("com.x.NOPE"), None, None)],
            ),
        );
        assert_eq!(res.get(ComponentType::Provider, IssueKind::Undefined).len(), 1);
    }

    #[test]
    fn test_first_offending_path_permission_wins() {
        // The second override would be flagged unprivileged on its own, but
        // evaluation stops at the first offender.
        let res = classify_one(
            vec![
                perm("com.x.PERM", Some("0x2")),
                perm("com.x.WEAK", Some("0x0")),
            ],
            provider(
                "p/p.P",
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                Some("com.x.PERM"),
                vec![
                    path_perm(None, Some("com.x.NOPE"), None),
                    path_perm(Some("com.x.WEAK"), None, None),
                ],
            ),
        );
        assert_eq!(res.total(), 1);
        assert_eq!(res.get(ComponentType::Provider, IssueKind::Undefined).len(), 1);
    }

    #[test]
    fn test_privileged_path_fields_are_skipped() {
        let res = classify_one(
            vec![perm("com.x.PERM", Some("0x2"))],
            provider(
                "p/p.P",
                Some("com.x.PERM"),
                None,
                None,
                vec![path_perm(Some("com.x.PERM"), Some("com.x.PERM"), None)],
            ),
        );
        // read/write fall back to the privileged base and the path override
        // only names privileged permissions
        assert_eq!(res.total(), 0);
    }

    #[test]
    fn test_protected_receiver_is_exempt() {
        let mut m = model(
            "p",
            Vec::new(),
            vec![receiver("p/p.R", None, &["a.ACTION"])],
        );
        m.protected_broadcasts.push("a.ACTION".into());
        let res = classify_models(PrivilegeRule::ProtectionFlags, &[m]);
        assert_eq!(res.total(), 0);
    }

    #[test]
    fn test_actionless_receiver_is_exempt() {
        let res = classify_one(Vec::new(), receiver("p/p.R", None, &[]));
        assert_eq!(res.total(), 0);
    }

    #[test]
    fn test_partially_protected_receiver_is_flagged() {
        let mut m = model(
            "p",
            Vec::new(),
            vec![receiver("p/p.R", None, &["a.ACTION", "a.OTHER"])],
        );
        m.protected_broadcasts.push("a.ACTION".into());
        let res = classify_models(PrivilegeRule::ProtectionFlags, &[m]);
        assert_eq!(res.get(ComponentType::Receiver, IssueKind::Unprivileged).len(), 1);
    }

    #[test]
    fn test_cross_package_permission_definitions() {
        let platform = model("android", vec![perm("com.x.PERM", Some("0x2"))], Vec::new());
        let app = model("p", Vec::new(), vec![activity("p/p.A", Some("com.x.PERM"))]);

        // Alone, the app's guard is dangling
        let alone = classify_models(PrivilegeRule::ProtectionFlags, &[app.clone()]);
        assert_eq!(alone.get(ComponentType::Activity, IssueKind::Undefined).len(), 1);

        // Merged with the declaring package it resolves as privileged
        let merged = classify_models(PrivilegeRule::ProtectionFlags, &[platform, app]);
        assert_eq!(merged.total(), 0);
    }

    #[test]
    fn test_first_definition_wins_for_duplicates() {
        let models = vec![
            model("a", vec![perm("com.x.PERM", Some("0x2"))], Vec::new()),
            model(
                "b",
                vec![perm("com.x.PERM", Some("0x0"))],
                vec![activity("b/b.A", Some("com.x.PERM"))],
            ),
        ];
        let res = classify_models(PrivilegeRule::ProtectionFlags, &models);
        assert_eq!(res.total(), 0);
    }
}
