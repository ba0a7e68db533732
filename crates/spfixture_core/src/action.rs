use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ActionError;
use crate::remote::{GroupRef, RoleType};
use crate::resolver::{OperationFamily, ScopeKeys, check_target};

/// Every `Type` value the engine understands, in the order they are matched.
pub const ACTION_TYPES: &[&str] = &[
    "createSiteCollection",
    "deleteSiteCollection",
    "createSite",
    "deleteSite",
    "createList",
    "deleteList",
    "createListItem",
    "deleteListItem",
    "createListItemAttachment",
    "deleteListItemAttachment",
    "createFolder",
    "deleteFolder",
    "createTextDocument",
    "createGroup",
    "deleteGroup",
    "createUser",
    "updateUser",
    "addUserToSharepointGroup",
    "removeUserFromSharepointGroup",
    "createRoleAssignment",
    "deleteRoleAssignment",
    "breakRoleInheritance",
    "resetRoleInheritance",
    "addUserToFolderPermissions",
    "setNoIndex",
];

const DEFAULT_WEB_TEMPLATE: &str = "STS#0";
const DEFAULT_LANGUAGE: u32 = 1033;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type", rename_all = "camelCase")]
pub enum Action {
    CreateSiteCollection(CreateSiteCollection),
    DeleteSiteCollection(DeleteSiteCollection),
    CreateSite(CreateSite),
    DeleteSite(DeleteSite),
    CreateList(CreateList),
    DeleteList(DeleteList),
    CreateListItem(CreateListItem),
    DeleteListItem(DeleteListItem),
    CreateListItemAttachment(CreateListItemAttachment),
    DeleteListItemAttachment(DeleteListItemAttachment),
    CreateFolder(CreateFolder),
    DeleteFolder(DeleteFolder),
    CreateTextDocument(CreateTextDocument),
    CreateGroup(CreateGroup),
    DeleteGroup(DeleteGroup),
    CreateUser(CreateUser),
    UpdateUser(UpdateUser),
    AddUserToSharepointGroup(GroupMembership),
    RemoveUserFromSharepointGroup(GroupMembership),
    CreateRoleAssignment(CreateRoleAssignment),
    DeleteRoleAssignment(DeleteRoleAssignment),
    BreakRoleInheritance(BreakRoleInheritance),
    ResetRoleInheritance(ResetRoleInheritance),
    AddUserToFolderPermissions(AddUserToFolderPermissions),
    SetNoIndex(SetNoIndex),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSiteCollection {
    pub url: String,
    pub title: String,
    pub description: String,
    pub user: String,
    #[serde(deserialize_with = "lenient_string")]
    pub lcid: String,
    pub web_template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSiteCollection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSite {
    pub parent_site_url: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub use_same_permissions_as_parent_site: bool,
    #[serde(default)]
    pub lcid: Option<u32>,
    #[serde(default)]
    pub web_template: Option<String>,
}

impl CreateSite {
    pub fn language(&self) -> u32 {
        self.lcid.unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn web_template(&self) -> &str {
        self.web_template.as_deref().unwrap_or(DEFAULT_WEB_TEMPLATE)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteSite {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateList {
    pub parent_site_url: String,
    pub title: String,
    pub description: String,
    pub list_template_name: ListTemplate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteList {
    pub parent_site_url: String,
    pub guid: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateListItem {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub columns: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteListItem {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub item_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateListItemAttachment {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub item_id: i64,
    pub file_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteListItemAttachment {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub item_id: i64,
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateFolder {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub folder_name: String,
    #[serde(default)]
    pub parent_folder: Option<String>,
    /// Reuse folders that already exist instead of creating every segment.
    #[serde(default)]
    pub reuse_existing: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteFolder {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub folder_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTextDocument {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    pub file_name: String,
    pub text: String,
    pub title: String,
    #[serde(default)]
    pub parent_folder: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateGroup {
    pub site_collection_url: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub role: Option<RoleType>,
}

impl CreateGroup {
    /// Role to grant right after creation; `None` in the file means no grant.
    pub fn granted_role(&self) -> Option<RoleType> {
        self.role.filter(|role| *role != RoleType::None)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteGroup {
    pub site_collection_url: String,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl DeleteGroup {
    pub fn group(&self) -> Result<GroupRef<'_>, String> {
        group_ref(self.group_id, self.group_name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateUser {
    pub site_collection_url: String,
    pub login_name: String,
    pub title: String,
    pub is_site_admin: bool,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateUser {
    pub site_collection_url: String,
    pub login_name: String,
    pub is_site_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupMembership {
    pub site_collection_url: String,
    pub login_name: String,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl GroupMembership {
    pub fn group(&self) -> Result<GroupRef<'_>, String> {
        group_ref(self.group_id, self.group_name.as_deref())
    }
}

/// Principal a role assignment is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal<'a> {
    User(&'a str),
    Group(&'a str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRoleAssignment {
    pub site_url: String,
    pub target: String,
    pub role: RoleType,
    #[serde(default)]
    pub login_name: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub list_guid: Option<Uuid>,
    #[serde(default)]
    pub item_id: Option<i64>,
}

impl CreateRoleAssignment {
    pub fn principal(&self) -> Result<Principal<'_>, String> {
        match (self.login_name.as_deref(), self.group_name.as_deref()) {
            (Some(login), _) => Ok(Principal::User(login)),
            (None, Some(group)) => Ok(Principal::Group(group)),
            (None, None) => Err("one of `LoginName` or `GroupName` is required".to_string()),
        }
    }

    pub fn scope_keys(&self) -> ScopeKeys {
        ScopeKeys::new(self.list_guid, self.item_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRoleAssignment {
    pub site_url: String,
    pub target: String,
    pub principal_id: i64,
    #[serde(default)]
    pub list_guid: Option<Uuid>,
    #[serde(default)]
    pub item_id: Option<i64>,
}

impl DeleteRoleAssignment {
    pub fn scope_keys(&self) -> ScopeKeys {
        ScopeKeys::new(self.list_guid, self.item_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BreakRoleInheritance {
    pub site_url: String,
    pub target: String,
    pub copy_role_assignments: bool,
    pub clear_sub_scopes: bool,
    #[serde(default)]
    pub list_guid: Option<Uuid>,
    #[serde(default)]
    pub item_id: Option<i64>,
}

impl BreakRoleInheritance {
    pub fn scope_keys(&self) -> ScopeKeys {
        ScopeKeys::new(self.list_guid, self.item_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResetRoleInheritance {
    pub site_url: String,
    pub target: String,
    #[serde(default)]
    pub list_guid: Option<Uuid>,
    #[serde(default)]
    pub item_id: Option<i64>,
}

impl ResetRoleInheritance {
    pub fn scope_keys(&self) -> ScopeKeys {
        ScopeKeys::new(self.list_guid, self.item_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddUserToFolderPermissions {
    pub parent_site_url: String,
    pub list_guid: Uuid,
    #[serde(rename = "FolderID", deserialize_with = "lenient_i64")]
    pub folder_id: i64,
    #[serde(rename = "user")]
    pub user: String,
    #[serde(default)]
    pub role: Option<RoleType>,
}

impl AddUserToFolderPermissions {
    pub fn role(&self) -> RoleType {
        self.role.unwrap_or(RoleType::Contributor)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetNoIndex {
    pub site_url: String,
    pub target: String,
    pub value: bool,
    #[serde(default)]
    pub list_guid: Option<Uuid>,
}

impl SetNoIndex {
    pub fn scope_keys(&self) -> ScopeKeys {
        ScopeKeys::new(self.list_guid, None)
    }
}

/// List template names accepted by `createList`, with their numeric
/// template types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ListTemplate {
    GenericList,
    DocumentLibrary,
    Survey,
    Links,
    Announcements,
    Contacts,
    Events,
    Tasks,
    DiscussionBoard,
    PictureLibrary,
    DataSources,
    XMLForm,
    NoCodeWorkflows,
    WorkflowProcess,
    WebPageLibrary,
    CustomGrid,
    DataConnectionLibrary,
    WorkflowHistory,
    GanttTasks,
    HelpLibrary,
    TasksWithTimelineAndHierarchy,
    Meetings,
    Agenda,
    MeetingUser,
    Decision,
    MeetingObjective,
    TextBox,
    ThingsToBring,
    HomePageLibrary,
    Posts,
    Comments,
    Categories,
    IssueTracking,
    AdminTasks,
    ExternalList,
}

impl ListTemplate {
    pub fn type_id(self) -> i32 {
        match self {
            Self::GenericList => 100,
            Self::DocumentLibrary => 101,
            Self::Survey => 102,
            Self::Links => 103,
            Self::Announcements => 104,
            Self::Contacts => 105,
            Self::Events => 106,
            Self::Tasks => 107,
            Self::DiscussionBoard => 108,
            Self::PictureLibrary => 109,
            Self::DataSources => 110,
            Self::XMLForm => 115,
            Self::NoCodeWorkflows => 117,
            Self::WorkflowProcess => 118,
            Self::WebPageLibrary => 119,
            Self::CustomGrid => 120,
            Self::DataConnectionLibrary => 130,
            Self::WorkflowHistory => 140,
            Self::GanttTasks => 150,
            Self::HelpLibrary => 151,
            Self::TasksWithTimelineAndHierarchy => 171,
            Self::Meetings => 200,
            Self::Agenda => 201,
            Self::MeetingUser => 202,
            Self::Decision => 204,
            Self::MeetingObjective => 207,
            Self::TextBox => 210,
            Self::ThingsToBring => 211,
            Self::HomePageLibrary => 212,
            Self::Posts => 301,
            Self::Comments => 302,
            Self::Categories => 303,
            Self::IssueTracking => 1100,
            Self::AdminTasks => 1200,
            Self::ExternalList => 600,
        }
    }
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CreateSiteCollection(_) => "createSiteCollection",
            Self::DeleteSiteCollection(_) => "deleteSiteCollection",
            Self::CreateSite(_) => "createSite",
            Self::DeleteSite(_) => "deleteSite",
            Self::CreateList(_) => "createList",
            Self::DeleteList(_) => "deleteList",
            Self::CreateListItem(_) => "createListItem",
            Self::DeleteListItem(_) => "deleteListItem",
            Self::CreateListItemAttachment(_) => "createListItemAttachment",
            Self::DeleteListItemAttachment(_) => "deleteListItemAttachment",
            Self::CreateFolder(_) => "createFolder",
            Self::DeleteFolder(_) => "deleteFolder",
            Self::CreateTextDocument(_) => "createTextDocument",
            Self::CreateGroup(_) => "createGroup",
            Self::DeleteGroup(_) => "deleteGroup",
            Self::CreateUser(_) => "createUser",
            Self::UpdateUser(_) => "updateUser",
            Self::AddUserToSharepointGroup(_) => "addUserToSharepointGroup",
            Self::RemoveUserFromSharepointGroup(_) => "removeUserFromSharepointGroup",
            Self::CreateRoleAssignment(_) => "createRoleAssignment",
            Self::DeleteRoleAssignment(_) => "deleteRoleAssignment",
            Self::BreakRoleInheritance(_) => "breakRoleInheritance",
            Self::ResetRoleInheritance(_) => "resetRoleInheritance",
            Self::AddUserToFolderPermissions(_) => "addUserToFolderPermissions",
            Self::SetNoIndex(_) => "setNoIndex",
        }
    }

    /// Cross-field checks serde cannot express: alternative keys, target
    /// strings and the scope keys each target needs.
    fn validate(&self) -> Result<(), ActionError> {
        let reason = match self {
            Self::DeleteGroup(action) => action.group().err(),
            Self::AddUserToSharepointGroup(action) | Self::RemoveUserFromSharepointGroup(action) => {
                action.group().err()
            }
            Self::CreateRoleAssignment(action) => {
                check_target(
                    OperationFamily::RoleAssignment,
                    &action.target,
                    &action.scope_keys(),
                )?;
                action.principal().err()
            }
            Self::DeleteRoleAssignment(action) => {
                check_target(
                    OperationFamily::RoleAssignment,
                    &action.target,
                    &action.scope_keys(),
                )?;
                None
            }
            Self::BreakRoleInheritance(action) => {
                check_target(
                    OperationFamily::Inheritance,
                    &action.target,
                    &action.scope_keys(),
                )?;
                None
            }
            Self::ResetRoleInheritance(action) => {
                check_target(
                    OperationFamily::Inheritance,
                    &action.target,
                    &action.scope_keys(),
                )?;
                None
            }
            Self::SetNoIndex(action) => {
                check_target(OperationFamily::NoIndex, &action.target, &action.scope_keys())?;
                None
            }
            Self::CreateFolder(action) if !has_folder_segment(&action.folder_name) => {
                Some("`FolderName` must name at least one folder".to_string())
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(ActionError::InvalidAction {
                index: 0,
                action_type: self.type_name().to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Parse and validate a whole action file. Nothing is returned unless every
/// action is well-formed, so a bad entry aborts the run before any remote
/// call.
pub fn parse_actions(json: &str) -> Result<Vec<Action>> {
    let raw: Vec<Value> =
        serde_json::from_str(json).map_err(|error| ActionError::MalformedFile(error.to_string()))?;

    let mut actions = Vec::with_capacity(raw.len());
    for (position, value) in raw.into_iter().enumerate() {
        let index = position + 1;
        let Some(object) = value.as_object() else {
            return Err(ActionError::MalformedFile(format!("entry #{index} is not an object")).into());
        };
        let action_type = match object.get("Type") {
            Some(Value::String(name)) => name.clone(),
            _ => String::new(),
        };
        if !ACTION_TYPES.contains(&action_type.as_str()) {
            return Err(ActionError::UnsupportedAction {
                index,
                action: value.to_string(),
            }
            .into());
        }

        let action: Action =
            serde_json::from_value(value).map_err(|error| ActionError::InvalidAction {
                index,
                action_type: action_type.clone(),
                reason: error.to_string(),
            })?;
        action
            .validate()
            .map_err(|error| match error {
                ActionError::InvalidAction {
                    action_type,
                    reason,
                    ..
                } => ActionError::InvalidAction {
                    index,
                    action_type,
                    reason,
                },
                other => other,
            })
            .with_context(|| format!("action #{index} ({action_type}) is invalid"))?;
        actions.push(action);
    }
    Ok(actions)
}

fn has_folder_segment(path: &str) -> bool {
    path.split('/').any(|segment| !segment.trim().is_empty())
}

fn group_ref(id: Option<i64>, name: Option<&str>) -> Result<GroupRef<'_>, String> {
    match (id, name) {
        (Some(id), _) => Ok(GroupRef::Id(id)),
        (None, Some(name)) => Ok(GroupRef::Name(name)),
        (None, None) => Err("one of `GroupId` or `GroupName` is required".to_string()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrInt {
    Int(i64),
    Text(String),
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match StringOrInt::deserialize(deserializer)? {
        StringOrInt::Int(value) => value.to_string(),
        StringOrInt::Text(value) => value,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::Int(value) => Ok(value),
        StringOrInt::Text(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got `{value}`"))),
    }
}
