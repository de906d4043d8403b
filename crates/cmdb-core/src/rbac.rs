//! Role-based access control.
//!
//! Every registered node type gets four permissions, one per [`Action`],
//! named `{action}_{label}` with the label lower-cased. Users hold
//! permissions directly or through groups; staff and superusers get the
//! usual shortcuts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::CmdbError;
use crate::registry::TypeRegistry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Add,
    Change,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::View, Action::Add, Action::Change, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `codename(Action::View, "Device")` → `view_device`.
pub fn codename(action: Action, label: &str) -> String {
    format!("{}_{}", action.as_str(), label.to_lowercase())
}

/// `Can view Device`.
pub fn permission_name(action: Action, label: &str) -> String {
    format!("Can {} {}", action.as_str(), label)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub codename: String,
    pub name: String,
    pub label: String,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub permissions: BTreeSet<String>,
}

/// An authenticated principal. Holds no secret material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub groups: Vec<String>,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct SyncStats {
    pub total_types: usize,
    pub total_permissions: usize,
    pub types_processed: usize,
}

/// Permission catalog plus the users and groups that hold permissions.
#[derive(Debug, Default)]
pub struct AccessControl {
    permissions: RwLock<BTreeMap<String, Permission>>,
    groups: RwLock<BTreeMap<String, Group>>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(auth: &AuthConfig) -> Self {
        let acl = Self::new();
        for g in &auth.groups {
            acl.upsert_group(Group {
                name: g.name.clone(),
                permissions: g.permissions.iter().cloned().collect(),
            });
        }
        for u in &auth.users {
            acl.upsert_user(
                User {
                    username: u.username.clone(),
                    email: u.email.clone(),
                    is_staff: u.is_staff,
                    is_superuser: u.is_superuser,
                    is_active: u.is_active,
                    groups: u.groups.clone(),
                    permissions: u.permissions.iter().cloned().collect(),
                },
                &u.password_hash,
            );
        }
        acl
    }

    // ── Permission Catalog ───────────────────────────────────────

    /// Ensure the four permissions for `label` exist. Existing entries keep
    /// their codename; a changed display name is updated in place.
    pub fn create_permissions_for_type(&self, label: &str) -> Vec<Permission> {
        let mut catalog = self.permissions.write().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(Action::ALL.len());
        for action in Action::ALL {
            let code = codename(action, label);
            let name = permission_name(action, label);
            let perm = catalog.entry(code.clone()).or_insert_with(|| {
                tracing::debug!(codename = %code, "Created permission");
                Permission {
                    codename: code.clone(),
                    name: name.clone(),
                    label: label.to_string(),
                    action,
                }
            });
            if perm.name != name {
                perm.name = name;
                perm.label = label.to_string();
            }
            out.push(perm.clone());
        }
        out
    }

    /// Create permissions for every registered type.
    pub fn sync_all(&self, registry: &TypeRegistry) -> SyncStats {
        let labels = registry.known_labels();
        let mut stats = SyncStats {
            total_types: labels.len(),
            ..Default::default()
        };
        for label in &labels {
            let perms = self.create_permissions_for_type(label);
            stats.total_permissions += perms.len();
            stats.types_processed += 1;
        }
        tracing::info!(
            total_types = stats.total_types,
            total_permissions = stats.total_permissions,
            "Permissions synchronised"
        );
        stats
    }

    /// Remove the permissions of `label`. Returns the number removed.
    pub fn delete_permissions_for_type(&self, label: &str) -> usize {
        let mut catalog = self.permissions.write().unwrap_or_else(|e| e.into_inner());
        Action::ALL
            .iter()
            .filter(|a| catalog.remove(&codename(**a, label)).is_some())
            .count()
    }

    pub fn permission(&self, codename: &str) -> Option<Permission> {
        let catalog = self.permissions.read().unwrap_or_else(|e| e.into_inner());
        catalog.get(codename).cloned()
    }

    pub fn permissions_for_type(&self, label: &str) -> Vec<Permission> {
        let catalog = self.permissions.read().unwrap_or_else(|e| e.into_inner());
        Action::ALL
            .iter()
            .filter_map(|a| catalog.get(&codename(*a, label)).cloned())
            .collect()
    }

    pub fn permission_count(&self) -> usize {
        self.permissions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ── Users & Groups ───────────────────────────────────────────

    pub fn upsert_group(&self, group: Group) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups.insert(group.name.clone(), group);
    }

    pub fn upsert_user(&self, user: User, password_hash: &str) {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(
            user.username.clone(),
            Account {
                user,
                password_hash: password_hash.to_string(),
            },
        );
    }

    pub fn user(&self, username: &str) -> Option<User> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(username).map(|a| a.user.clone())
    }

    pub fn users(&self) -> Vec<User> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let mut users: Vec<User> = accounts.values().map(|a| a.user.clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub fn groups(&self) -> Vec<Group> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        groups.values().cloned().collect()
    }

    /// Check a username/password pair. Inactive users never authenticate.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        let account = {
            let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
            accounts.get(username).cloned()
        }?;
        if !account.user.is_active {
            tracing::info!(username, "Login refused for inactive user");
            return None;
        }
        match bcrypt::verify(password, &account.password_hash) {
            Ok(true) => Some(account.user),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(username, error = %e, "Stored password hash is unusable");
                None
            }
        }
    }

    // ── Checks ───────────────────────────────────────────────────

    /// Direct permissions plus those inherited from groups.
    pub fn effective_permissions(&self, user: &User) -> BTreeSet<String> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        let mut perms = user.permissions.clone();
        for name in &user.groups {
            if let Some(group) = groups.get(name) {
                perms.extend(group.permissions.iter().cloned());
            }
        }
        perms
    }

    pub fn has_perm(&self, user: &User, codename: &str) -> bool {
        if !user.is_active {
            return false;
        }
        if user.is_superuser {
            return true;
        }
        self.effective_permissions(user).contains(codename)
    }

    /// Whether `user` may perform `action` on nodes of `label`.
    ///
    /// With no label, staff pass outright and everyone else needs the action
    /// on at least one type.
    pub fn has_node_permission(&self, user: &User, action: Action, label: Option<&str>) -> bool {
        if !user.is_active {
            return false;
        }
        if user.is_superuser {
            return true;
        }
        match label {
            None if user.is_staff => true,
            Some(label) => self.has_perm(user, &codename(action, label)),
            None => {
                let prefix = format!("{}_", action.as_str());
                self.effective_permissions(user)
                    .iter()
                    .any(|p| p.starts_with(&prefix))
            }
        }
    }

    /// Registry categories reduced to labels `user` may view. Categories left
    /// empty are dropped; anonymous users see nothing.
    pub fn visible_categories(
        &self,
        user: Option<&User>,
        registry: &TypeRegistry,
    ) -> BTreeMap<String, Vec<String>> {
        let Some(user) = user else {
            return BTreeMap::new();
        };
        registry
            .categories()
            .into_iter()
            .filter_map(|(category, labels)| {
                let visible: Vec<String> = labels
                    .into_iter()
                    .filter(|l| self.has_node_permission(user, Action::View, Some(l.as_str())))
                    .collect();
                (!visible.is_empty()).then_some((category, visible))
            })
            .collect()
    }
}

/// Produce a bcrypt hash for storing in `[[auth.users]]`.
pub fn hash_password(password: &str) -> Result<String, CmdbError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| CmdbError::Auth(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDefinition;

    fn user(name: &str) -> User {
        User {
            username: name.into(),
            email: String::new(),
            is_staff: false,
            is_superuser: false,
            is_active: true,
            groups: vec![],
            permissions: BTreeSet::new(),
        }
    }

    #[test]
    fn codename_lowercases_label() {
        assert_eq!(codename(Action::View, "Device"), "view_device");
        assert_eq!(codename(Action::Delete, "DNS_Zone"), "delete_dns_zone");
        assert_eq!(permission_name(Action::Change, "DNS_Zone"), "Can change DNS_Zone");
    }

    #[test]
    fn create_permissions_is_idempotent() {
        let acl = AccessControl::new();
        let first = acl.create_permissions_for_type("Rack");
        let second = acl.create_permissions_for_type("Rack");
        assert_eq!(first, second);
        assert_eq!(acl.permission_count(), 4);
        assert_eq!(
            acl.permission("add_rack").map(|p| p.name),
            Some("Can add Rack".to_string())
        );
    }

    #[test]
    fn sync_all_covers_every_type() {
        let reg = TypeRegistry::new();
        reg.register("Rack", TypeDefinition::default(), None);
        reg.register("Room", TypeDefinition::default(), None);
        let acl = AccessControl::new();

        let stats = acl.sync_all(&reg);
        assert_eq!(
            stats,
            SyncStats {
                total_types: 2,
                total_permissions: 8,
                types_processed: 2
            }
        );
        assert_eq!(acl.sync_all(&reg).total_permissions, 8);
        assert_eq!(acl.permission_count(), 8);

        assert_eq!(acl.delete_permissions_for_type("Rack"), 4);
        assert_eq!(acl.delete_permissions_for_type("Rack"), 0);
        assert!(acl.permissions_for_type("Rack").is_empty());
    }

    #[test]
    fn node_permission_rules() {
        let acl = AccessControl::new();
        acl.upsert_group(Group {
            name: "dc".into(),
            permissions: ["view_rack".to_string()].into_iter().collect(),
        });

        let mut plain = user("plain");
        assert!(!acl.has_node_permission(&plain, Action::View, Some("Rack")));
        assert!(!acl.has_node_permission(&plain, Action::View, None));

        plain.groups.push("dc".into());
        assert!(acl.has_node_permission(&plain, Action::View, Some("Rack")));
        assert!(!acl.has_node_permission(&plain, Action::Change, Some("Rack")));
        assert!(acl.has_node_permission(&plain, Action::View, None));
        assert!(!acl.has_node_permission(&plain, Action::Delete, None));

        let mut staff = user("staff");
        staff.is_staff = true;
        assert!(acl.has_node_permission(&staff, Action::Delete, None));
        assert!(!acl.has_node_permission(&staff, Action::Delete, Some("Rack")));

        let mut root = user("root");
        root.is_superuser = true;
        assert!(acl.has_node_permission(&root, Action::Delete, Some("Rack")));

        root.is_active = false;
        assert!(!acl.has_node_permission(&root, Action::View, Some("Rack")));
    }

    #[test]
    fn visible_categories_filters_by_view() {
        let reg = TypeRegistry::new();
        reg.register(
            "Rack",
            TypeDefinition {
                category: Some("Data Center".into()),
                ..Default::default()
            },
            None,
        );
        reg.register("DNS_Zone", TypeDefinition::default(), None);

        let acl = AccessControl::new();
        let mut u = user("u");
        u.permissions.insert("view_rack".into());

        let cats = acl.visible_categories(Some(&u), &reg);
        assert_eq!(cats.len(), 1);
        assert_eq!(cats["Data Center"], vec!["Rack"]);
        assert!(acl.visible_categories(None, &reg).is_empty());
    }

    #[test]
    fn authenticate_checks_bcrypt_and_active_flag() {
        let hash = bcrypt::hash("s3cret", 4).unwrap();
        let acl = AccessControl::new();
        acl.upsert_user(user("alice"), &hash);
        let mut inactive = user("carol");
        inactive.is_active = false;
        acl.upsert_user(inactive, &hash);

        assert_eq!(
            acl.authenticate("alice", "s3cret").map(|u| u.username),
            Some("alice".into())
        );
        assert!(acl.authenticate("alice", "wrong").is_none());
        assert!(acl.authenticate("nobody", "s3cret").is_none());
        assert!(acl.authenticate("carol", "s3cret").is_none());
    }
}
