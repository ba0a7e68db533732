use anyhow::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Site-collection root web and the web the session was opened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    pub web_url: String,
    pub root_web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListHandle {
    pub id: Uuid,
    pub root_folder: FolderHandle,
    /// OData entity type of the list's items, needed for item writes.
    pub item_entity_type: String,
}

impl ListHandle {
    /// Web-relative folder URL below the list root.
    pub fn folder_url(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.root_folder.name,
            relative.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHandle {
    pub list_id: Uuid,
    pub item_entity_type: String,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHandle {
    pub name: String,
    pub server_relative_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    pub id: i64,
    pub login_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHandle {
    pub id: i64,
    pub login_name: String,
}

/// A securable object that role assignments, inheritance and crawl flags
/// apply to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetScope {
    SiteCollection { root_web_url: String },
    Site { web_url: String },
    List(ListHandle),
    ListItem(ItemHandle),
}

impl TargetScope {
    pub fn describe(&self) -> String {
        match self {
            Self::SiteCollection { root_web_url } => format!("site collection {root_web_url}"),
            Self::Site { web_url } => format!("site {web_url}"),
            Self::List(list) => format!("list {}", list.id),
            Self::ListItem(item) => format!("list {} item {}", item.list_id, item.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRef<'a> {
    Id(i64),
    Name(&'a str),
}

#[derive(Debug, Clone)]
pub struct WebCreation {
    pub url: String,
    pub title: String,
    pub description: String,
    pub web_template: String,
    pub language: u32,
    pub use_same_permissions_as_parent: bool,
}

#[derive(Debug, Clone)]
pub struct ListCreation {
    pub title: String,
    pub description: String,
    pub template_type: i32,
}

#[derive(Debug, Clone)]
pub struct UserCreation {
    pub login_name: String,
    pub title: String,
    pub email: Option<String>,
}

/// Built-in permission levels, addressed by their role type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RoleType {
    None,
    Guest,
    Reader,
    Contributor,
    WebDesigner,
    Administrator,
    Editor,
}

impl RoleType {
    pub fn type_id(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Guest => 1,
            Self::Reader => 2,
            Self::Contributor => 3,
            Self::WebDesigner => 4,
            Self::Administrator => 5,
            Self::Editor => 6,
        }
    }
}

/// Object-model calls available inside one authenticated session. Each call
/// is a confirmed round trip; nothing is batched across calls.
pub trait ContentApi {
    fn site_context(&mut self) -> Result<SiteContext>;

    fn create_web(&mut self, info: &WebCreation) -> Result<Uuid>;
    fn delete_web(&mut self) -> Result<()>;

    fn create_list(&mut self, info: &ListCreation) -> Result<Uuid>;
    fn get_list(&mut self, id: Uuid) -> Result<ListHandle>;
    fn delete_list(&mut self, list: &ListHandle) -> Result<()>;

    fn get_item(&mut self, list: &ListHandle, item_id: i64) -> Result<ItemHandle>;
    fn create_item(&mut self, list: &ListHandle, columns: &Map<String, Value>) -> Result<i64>;
    /// Create a folder item directly under the list root, titled with its name.
    fn create_folder_item(&mut self, list: &ListHandle, leaf_name: &str) -> Result<i64>;
    fn set_item_title(&mut self, item: &ItemHandle, title: &str) -> Result<()>;
    fn delete_item(&mut self, item: &ItemHandle) -> Result<()>;
    fn add_attachment(&mut self, item: &ItemHandle, file_name: &str, content: Vec<u8>)
    -> Result<()>;
    fn delete_attachment(&mut self, item: &ItemHandle, file_name: &str) -> Result<()>;

    fn get_folder(&mut self, server_relative_url: &str) -> Result<FolderHandle>;
    fn add_folder(&mut self, parent: &FolderHandle, name: &str) -> Result<FolderHandle>;
    fn child_folders(&mut self, parent: &FolderHandle) -> Result<Vec<FolderHandle>>;
    fn folder_item_id(&mut self, folder: &FolderHandle) -> Result<i64>;
    fn delete_folder(&mut self, folder: &FolderHandle) -> Result<()>;

    /// Upload a file into `folder` and return the list item backing it.
    fn add_file(
        &mut self,
        list: &ListHandle,
        folder: &FolderHandle,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<ItemHandle>;

    fn create_group(&mut self, title: &str, description: &str) -> Result<GroupHandle>;
    fn get_group(&mut self, group: GroupRef<'_>) -> Result<GroupHandle>;
    fn delete_group(&mut self, group: GroupRef<'_>) -> Result<()>;
    fn add_group_member(&mut self, group: &GroupHandle, user: &UserHandle) -> Result<()>;
    fn remove_group_member(&mut self, group: &GroupHandle, login_name: &str) -> Result<()>;

    fn create_user(&mut self, info: &UserCreation) -> Result<UserHandle>;
    /// Resolve a user by login name, adding it to the site when absent.
    fn ensure_user(&mut self, login_name: &str) -> Result<UserHandle>;
    fn set_site_admin(&mut self, user: &UserHandle, value: bool) -> Result<()>;

    /// Bind `principal_id` to the root web's `role` definition at `scope`.
    /// Returns the principal id of the resulting assignment.
    fn add_role_assignment(
        &mut self,
        scope: &TargetScope,
        principal_id: i64,
        role: RoleType,
    ) -> Result<i64>;
    fn delete_role_assignment(&mut self, scope: &TargetScope, principal_id: i64) -> Result<()>;
    fn break_role_inheritance(
        &mut self,
        scope: &TargetScope,
        copy_role_assignments: bool,
        clear_sub_scopes: bool,
    ) -> Result<()>;
    fn reset_role_inheritance(&mut self, scope: &TargetScope) -> Result<()>;
    fn set_no_crawl(&mut self, scope: &TargetScope, value: bool) -> Result<()>;
}

/// Opens authenticated sessions. A session is released when dropped.
pub trait SessionFactory {
    type Session: ContentApi;

    fn open(&self, site_url: &str) -> Result<Self::Session>;
}
