use anyhow::{Context, Result};
use tracing::debug;
use uuid::Uuid;

use crate::error::ActionError;
use crate::remote::{ContentApi, ItemHandle, ListHandle, TargetScope};

/// Groups of securable operations; each accepts its own set of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFamily {
    RoleAssignment,
    Inheritance,
    NoIndex,
}

impl OperationFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoleAssignment => "role assignment",
            Self::Inheritance => "role inheritance",
            Self::NoIndex => "no-index",
        }
    }

    pub fn accepts(self, kind: TargetKind) -> bool {
        match self {
            Self::RoleAssignment => true,
            Self::Inheritance => !matches!(kind, TargetKind::SiteCollection),
            Self::NoIndex => matches!(kind, TargetKind::Site | TargetKind::List),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    SiteCollection,
    Site,
    List,
    ListItem,
}

impl TargetKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "siteCollection" => Some(Self::SiteCollection),
            "site" => Some(Self::Site),
            "list" => Some(Self::List),
            "listItem" => Some(Self::ListItem),
            _ => None,
        }
    }
}

/// Optional lookup keys carried by a securable action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeKeys {
    pub list_guid: Option<Uuid>,
    pub item_id: Option<i64>,
}

impl ScopeKeys {
    pub fn new(list_guid: Option<Uuid>, item_id: Option<i64>) -> Self {
        Self { list_guid, item_id }
    }
}

/// Check a target string against a family and the keys it needs, without
/// touching the server.
pub fn check_target(
    family: OperationFamily,
    target: &str,
    keys: &ScopeKeys,
) -> Result<TargetKind, ActionError> {
    let kind = TargetKind::parse(target)
        .filter(|kind| family.accepts(*kind))
        .ok_or_else(|| ActionError::UnsupportedTarget {
            target: target.to_string(),
            family: family.as_str().to_string(),
        })?;

    if matches!(kind, TargetKind::List | TargetKind::ListItem) && keys.list_guid.is_none() {
        return Err(ActionError::MissingScopeKey {
            target: target.to_string(),
            field: "ListGuid",
        });
    }
    if kind == TargetKind::ListItem && keys.item_id.is_none() {
        return Err(ActionError::MissingScopeKey {
            target: target.to_string(),
            field: "ItemId",
        });
    }
    Ok(kind)
}

/// Resolve a target string to a securable object in the session's site.
/// The target is validated first so an unsupported target makes no remote
/// call at all.
pub fn resolve<S: ContentApi + ?Sized>(
    session: &mut S,
    family: OperationFamily,
    target: &str,
    keys: &ScopeKeys,
) -> Result<TargetScope> {
    let kind = check_target(family, target, keys)?;
    let scope = match (kind, keys.list_guid, keys.item_id) {
        (TargetKind::SiteCollection, _, _) => TargetScope::SiteCollection {
            root_web_url: session.site_context()?.root_web_url,
        },
        (TargetKind::Site, _, _) => TargetScope::Site {
            web_url: session.site_context()?.web_url,
        },
        (TargetKind::List, Some(list_id), _) => TargetScope::List(resolve_list(session, list_id)?),
        (TargetKind::ListItem, Some(list_id), Some(item_id)) => {
            TargetScope::ListItem(resolve_item(session, list_id, item_id)?)
        }
        // check_target guarantees the keys for list targets
        (TargetKind::List | TargetKind::ListItem, _, _) => {
            return Err(ActionError::MissingScopeKey {
                target: target.to_string(),
                field: "ListGuid",
            }
            .into());
        }
    };
    debug!(target, scope = %scope.describe(), "resolved target");
    Ok(scope)
}

pub fn resolve_list<S: ContentApi + ?Sized>(session: &mut S, list_id: Uuid) -> Result<ListHandle> {
    session
        .get_list(list_id)
        .with_context(|| format!("failed to resolve list {list_id}"))
}

pub fn resolve_item<S: ContentApi + ?Sized>(
    session: &mut S,
    list_id: Uuid,
    item_id: i64,
) -> Result<ItemHandle> {
    let list = resolve_list(session, list_id)?;
    session
        .get_item(&list, item_id)
        .with_context(|| format!("failed to resolve item {item_id} in list {list_id}"))
}
