//! In-memory SharePoint stand-in for engine tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use anyhow::{Result, bail};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::admin::{AdminApi, SiteCollectionCreation};
use crate::remote::{
    ContentApi, FolderHandle, GroupHandle, GroupRef, ItemHandle, ListCreation, ListHandle,
    RoleType, SessionFactory, SiteContext, TargetScope, UserCreation, UserHandle, WebCreation,
};

pub const ROOT_WEB_URL: &str = "http://site";

#[derive(Debug, Default)]
pub struct FakeList {
    pub title: String,
    pub root_name: String,
    pub items: BTreeMap<i64, Map<String, Value>>,
    next_item: i64,
}

impl FakeList {
    fn add_item(&mut self, columns: Map<String, Value>) -> i64 {
        self.next_item += 1;
        self.items.insert(self.next_item, columns);
        self.next_item
    }
}

#[derive(Debug, Default)]
pub struct FakeGroup {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub members: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeServer {
    pub webs: BTreeMap<String, Uuid>,
    pub lists: BTreeMap<Uuid, FakeList>,
    /// Web-relative folder URL to the id of the list item backing it.
    pub folders: BTreeMap<String, Option<i64>>,
    pub folder_creations: Vec<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub attachments: BTreeMap<(Uuid, i64), BTreeMap<String, Vec<u8>>>,
    pub groups: Vec<FakeGroup>,
    pub users: BTreeMap<String, (i64, bool)>,
    pub role_assignments: Vec<(String, i64, RoleType)>,
    pub broken_inheritance: BTreeMap<String, (bool, bool)>,
    pub no_crawl: BTreeMap<String, bool>,
    pub opened: Vec<String>,
    pub released: usize,
    pub calls: usize,
    pub mutations: usize,
    /// Operation name that fails with an injected error.
    pub fail_on: Option<&'static str>,
    next_id: i64,
    next_guid: u128,
}

pub type SharedServer = Rc<RefCell<FakeServer>>;

impl FakeServer {
    pub fn shared() -> SharedServer {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn session(server: &SharedServer, web_url: &str) -> FakeSession {
        server.borrow_mut().opened.push(web_url.to_string());
        FakeSession {
            server: Rc::clone(server),
            web_url: web_url.to_string(),
        }
    }

    pub fn list_by_title(&self, title: &str) -> Option<(Uuid, &FakeList)> {
        self.lists
            .iter()
            .find(|(_, list)| list.title == title)
            .map(|(id, list)| (*id, list))
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn next_guid(&mut self) -> Uuid {
        self.next_guid += 1;
        Uuid::from_u128(0x5eed_0000_0000_0000_0000_0000_0000_0000 + self.next_guid)
    }

    fn enter(&mut self, operation: &'static str, mutates: bool) -> Result<()> {
        self.calls += 1;
        if mutates {
            self.mutations += 1;
        }
        if self.fail_on == Some(operation) {
            bail!("injected failure in {operation}");
        }
        Ok(())
    }

    fn list_mut(&mut self, id: Uuid) -> Result<&mut FakeList> {
        match self.lists.get_mut(&id) {
            Some(list) => Ok(list),
            None => bail!("list {id} does not exist"),
        }
    }

    fn list_for_folder(&mut self, key: &str) -> Option<&mut FakeList> {
        let root = key.split('/').next().unwrap_or_default();
        self.lists.values_mut().find(|list| list.root_name == root)
    }

    fn insert_folder(&mut self, key: String) -> Result<FolderHandle> {
        self.folder_creations.push(key.clone());
        if self.folders.contains_key(&key) {
            bail!("a folder already exists at {key}");
        }
        let name = key.rsplit('/').next().unwrap_or_default().to_string();
        let item_id = self
            .list_for_folder(&key)
            .map(|list| list.add_item(Map::new()));
        self.folders.insert(key.clone(), item_id);
        Ok(folder_handle(&name, &key))
    }

    fn user(&mut self, login_name: &str) -> UserHandle {
        if let Some((id, _)) = self.users.get(login_name) {
            return UserHandle {
                id: *id,
                login_name: login_name.to_string(),
            };
        }
        let id = self.next_id();
        self.users.insert(login_name.to_string(), (id, false));
        UserHandle {
            id,
            login_name: login_name.to_string(),
        }
    }

    fn group_index(&self, group: GroupRef<'_>) -> Result<usize> {
        let found = self.groups.iter().position(|candidate| match group {
            GroupRef::Id(id) => candidate.id == id,
            GroupRef::Name(name) => candidate.title == name,
        });
        match found {
            Some(index) => Ok(index),
            None => bail!("group {group:?} does not exist"),
        }
    }
}

fn folder_key(server_relative_url: &str) -> String {
    server_relative_url.trim_matches('/').to_string()
}

fn folder_handle(name: &str, key: &str) -> FolderHandle {
    FolderHandle {
        name: name.to_string(),
        server_relative_url: format!("/{key}"),
    }
}

fn scope_key(scope: &TargetScope) -> String {
    match scope {
        TargetScope::SiteCollection { root_web_url } => format!("collection:{root_web_url}"),
        TargetScope::Site { web_url } => format!("site:{web_url}"),
        TargetScope::List(list) => format!("list:{}", list.id),
        TargetScope::ListItem(item) => format!("item:{}:{}", item.list_id, item.id),
    }
}

pub struct FakeSession {
    server: SharedServer,
    web_url: String,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.server.borrow_mut().released += 1;
    }
}

impl FakeSession {
    fn state(&self) -> std::cell::RefMut<'_, FakeServer> {
        self.server.borrow_mut()
    }
}

impl ContentApi for FakeSession {
    fn site_context(&mut self) -> Result<SiteContext> {
        let mut server = self.state();
        server.enter("site_context", false)?;
        Ok(SiteContext {
            web_url: self.web_url.clone(),
            root_web_url: ROOT_WEB_URL.to_string(),
        })
    }

    fn create_web(&mut self, info: &WebCreation) -> Result<Uuid> {
        let mut server = self.state();
        server.enter("create_web", true)?;
        let url = format!("{}/{}", self.web_url, info.url);
        if server.webs.contains_key(&url) {
            bail!("web {url} already exists");
        }
        let id = server.next_guid();
        server.webs.insert(url, id);
        Ok(id)
    }

    fn delete_web(&mut self) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_web", true)?;
        if server.webs.remove(&self.web_url).is_none() {
            bail!("web {} does not exist", self.web_url);
        }
        Ok(())
    }

    fn create_list(&mut self, info: &ListCreation) -> Result<Uuid> {
        let mut server = self.state();
        server.enter("create_list", true)?;
        let id = server.next_guid();
        let root_name = info.title.replace(' ', "");
        server.folders.insert(root_name.clone(), None);
        server.lists.insert(
            id,
            FakeList {
                title: info.title.clone(),
                root_name,
                ..FakeList::default()
            },
        );
        Ok(id)
    }

    fn get_list(&mut self, id: Uuid) -> Result<ListHandle> {
        let mut server = self.state();
        server.enter("get_list", false)?;
        let list = server.list_mut(id)?;
        Ok(ListHandle {
            id,
            root_folder: folder_handle(&list.root_name, &list.root_name),
            item_entity_type: format!("SP.Data.{}ListItem", list.root_name),
        })
    }

    fn delete_list(&mut self, list: &ListHandle) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_list", true)?;
        let Some(removed) = server.lists.remove(&list.id) else {
            bail!("list {} does not exist", list.id);
        };
        let prefix = removed.root_name;
        server
            .folders
            .retain(|key, _| key != &prefix && !key.starts_with(&format!("{prefix}/")));
        Ok(())
    }

    fn get_item(&mut self, list: &ListHandle, item_id: i64) -> Result<ItemHandle> {
        let mut server = self.state();
        server.enter("get_item", false)?;
        if !server.list_mut(list.id)?.items.contains_key(&item_id) {
            bail!("item {item_id} does not exist in list {}", list.id);
        }
        Ok(ItemHandle {
            list_id: list.id,
            item_entity_type: list.item_entity_type.clone(),
            id: item_id,
        })
    }

    fn create_item(&mut self, list: &ListHandle, columns: &Map<String, Value>) -> Result<i64> {
        let mut server = self.state();
        server.enter("create_item", true)?;
        Ok(server.list_mut(list.id)?.add_item(columns.clone()))
    }

    fn create_folder_item(&mut self, list: &ListHandle, leaf_name: &str) -> Result<i64> {
        let mut server = self.state();
        server.enter("create_folder_item", true)?;
        let key = format!("{}/{leaf_name}", folder_key(&list.root_folder.server_relative_url));
        server.insert_folder(key.clone())?;
        let Some(Some(item_id)) = server.folders.get(&key).copied() else {
            bail!("folder {key} has no list item");
        };
        if let Some(columns) = server.list_mut(list.id)?.items.get_mut(&item_id) {
            columns.insert("Title".to_string(), Value::String(leaf_name.to_string()));
        }
        Ok(item_id)
    }

    fn set_item_title(&mut self, item: &ItemHandle, title: &str) -> Result<()> {
        let mut server = self.state();
        server.enter("set_item_title", true)?;
        let Some(columns) = server.list_mut(item.list_id)?.items.get_mut(&item.id) else {
            bail!("item {} does not exist", item.id);
        };
        columns.insert("Title".to_string(), Value::String(title.to_string()));
        Ok(())
    }

    fn delete_item(&mut self, item: &ItemHandle) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_item", true)?;
        if server
            .list_mut(item.list_id)?
            .items
            .remove(&item.id)
            .is_none()
        {
            bail!("item {} does not exist", item.id);
        }
        Ok(())
    }

    fn add_attachment(&mut self, item: &ItemHandle, file_name: &str, content: Vec<u8>) -> Result<()> {
        let mut server = self.state();
        server.enter("add_attachment", true)?;
        server
            .attachments
            .entry((item.list_id, item.id))
            .or_default()
            .insert(file_name.to_string(), content);
        Ok(())
    }

    fn delete_attachment(&mut self, item: &ItemHandle, file_name: &str) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_attachment", true)?;
        let removed = server
            .attachments
            .get_mut(&(item.list_id, item.id))
            .and_then(|files| files.remove(file_name));
        if removed.is_none() {
            bail!("attachment {file_name} does not exist on item {}", item.id);
        }
        Ok(())
    }

    fn get_folder(&mut self, server_relative_url: &str) -> Result<FolderHandle> {
        let mut server = self.state();
        server.enter("get_folder", false)?;
        let key = folder_key(server_relative_url);
        if !server.folders.contains_key(&key) {
            bail!("folder {server_relative_url} does not exist");
        }
        let name = key.rsplit('/').next().unwrap_or_default().to_string();
        Ok(folder_handle(&name, &key))
    }

    fn add_folder(&mut self, parent: &FolderHandle, name: &str) -> Result<FolderHandle> {
        let mut server = self.state();
        server.enter("add_folder", true)?;
        let parent_key = folder_key(&parent.server_relative_url);
        if !server.folders.contains_key(&parent_key) {
            bail!("parent folder {} does not exist", parent.server_relative_url);
        }
        server.insert_folder(format!("{parent_key}/{name}"))
    }

    fn child_folders(&mut self, parent: &FolderHandle) -> Result<Vec<FolderHandle>> {
        let mut server = self.state();
        server.enter("child_folders", false)?;
        let prefix = format!("{}/", folder_key(&parent.server_relative_url));
        Ok(server
            .folders
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| folder_handle(rest, key))
            })
            .collect())
    }

    fn folder_item_id(&mut self, folder: &FolderHandle) -> Result<i64> {
        let mut server = self.state();
        server.enter("folder_item_id", false)?;
        match server.folders.get(&folder_key(&folder.server_relative_url)) {
            Some(Some(item_id)) => Ok(*item_id),
            _ => bail!("folder {} has no list item", folder.server_relative_url),
        }
    }

    fn delete_folder(&mut self, folder: &FolderHandle) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_folder", true)?;
        let key = folder_key(&folder.server_relative_url);
        if server.folders.remove(&key).is_none() {
            bail!("folder {key} does not exist");
        }
        let nested = format!("{key}/");
        server.folders.retain(|candidate, _| !candidate.starts_with(&nested));
        Ok(())
    }

    fn add_file(
        &mut self,
        list: &ListHandle,
        folder: &FolderHandle,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<ItemHandle> {
        let mut server = self.state();
        server.enter("add_file", true)?;
        let url = format!("{}/{file_name}", folder_key(&folder.server_relative_url));
        server.files.insert(url, content);
        let id = server.list_mut(list.id)?.add_item(Map::new());
        Ok(ItemHandle {
            list_id: list.id,
            item_entity_type: list.item_entity_type.clone(),
            id,
        })
    }

    fn create_group(&mut self, title: &str, description: &str) -> Result<GroupHandle> {
        let mut server = self.state();
        server.enter("create_group", true)?;
        if server.groups.iter().any(|group| group.title == title) {
            bail!("group {title} already exists");
        }
        let id = server.next_id();
        server.groups.push(FakeGroup {
            id,
            title: title.to_string(),
            description: description.to_string(),
            members: BTreeSet::new(),
        });
        Ok(GroupHandle {
            id,
            login_name: title.to_string(),
        })
    }

    fn get_group(&mut self, group: GroupRef<'_>) -> Result<GroupHandle> {
        let mut server = self.state();
        server.enter("get_group", false)?;
        let index = server.group_index(group)?;
        let found = &server.groups[index];
        Ok(GroupHandle {
            id: found.id,
            login_name: found.title.clone(),
        })
    }

    fn delete_group(&mut self, group: GroupRef<'_>) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_group", true)?;
        let index = server.group_index(group)?;
        server.groups.remove(index);
        Ok(())
    }

    fn add_group_member(&mut self, group: &GroupHandle, user: &UserHandle) -> Result<()> {
        let mut server = self.state();
        server.enter("add_group_member", true)?;
        let index = server.group_index(GroupRef::Id(group.id))?;
        server.groups[index]
            .members
            .insert(user.login_name.clone());
        Ok(())
    }

    fn remove_group_member(&mut self, group: &GroupHandle, login_name: &str) -> Result<()> {
        let mut server = self.state();
        server.enter("remove_group_member", true)?;
        let index = server.group_index(GroupRef::Id(group.id))?;
        if !server.groups[index].members.remove(login_name) {
            bail!("{login_name} is not a member of {}", group.login_name);
        }
        Ok(())
    }

    fn create_user(&mut self, info: &UserCreation) -> Result<UserHandle> {
        let mut server = self.state();
        server.enter("create_user", true)?;
        if server.users.contains_key(&info.login_name) {
            bail!("user {} already exists", info.login_name);
        }
        Ok(server.user(&info.login_name))
    }

    fn ensure_user(&mut self, login_name: &str) -> Result<UserHandle> {
        let mut server = self.state();
        server.enter("ensure_user", true)?;
        Ok(server.user(login_name))
    }

    fn set_site_admin(&mut self, user: &UserHandle, value: bool) -> Result<()> {
        let mut server = self.state();
        server.enter("set_site_admin", true)?;
        match server.users.get_mut(&user.login_name) {
            Some((_, admin)) => {
                *admin = value;
                Ok(())
            }
            None => bail!("user {} does not exist", user.login_name),
        }
    }

    fn add_role_assignment(
        &mut self,
        scope: &TargetScope,
        principal_id: i64,
        role: RoleType,
    ) -> Result<i64> {
        let mut server = self.state();
        server.enter("add_role_assignment", true)?;
        server
            .role_assignments
            .push((scope_key(scope), principal_id, role));
        Ok(principal_id)
    }

    fn delete_role_assignment(&mut self, scope: &TargetScope, principal_id: i64) -> Result<()> {
        let mut server = self.state();
        server.enter("delete_role_assignment", true)?;
        let key = scope_key(scope);
        let before = server.role_assignments.len();
        server
            .role_assignments
            .retain(|(scope, principal, _)| !(scope == &key && *principal == principal_id));
        if server.role_assignments.len() == before {
            bail!("principal {principal_id} has no role assignment on {key}");
        }
        Ok(())
    }

    fn break_role_inheritance(
        &mut self,
        scope: &TargetScope,
        copy_role_assignments: bool,
        clear_sub_scopes: bool,
    ) -> Result<()> {
        let mut server = self.state();
        server.enter("break_role_inheritance", true)?;
        server.broken_inheritance.insert(
            scope_key(scope),
            (copy_role_assignments, clear_sub_scopes),
        );
        Ok(())
    }

    fn reset_role_inheritance(&mut self, scope: &TargetScope) -> Result<()> {
        let mut server = self.state();
        server.enter("reset_role_inheritance", true)?;
        server.broken_inheritance.remove(&scope_key(scope));
        Ok(())
    }

    fn set_no_crawl(&mut self, scope: &TargetScope, value: bool) -> Result<()> {
        let mut server = self.state();
        server.enter("set_no_crawl", true)?;
        server.no_crawl.insert(scope_key(scope), value);
        Ok(())
    }
}

pub struct FakeConnector {
    pub server: SharedServer,
    /// URLs that refuse to open a session.
    pub unreachable: Vec<String>,
}

impl FakeConnector {
    pub fn new(server: &SharedServer) -> Self {
        Self {
            server: Rc::clone(server),
            unreachable: Vec::new(),
        }
    }
}

impl SessionFactory for FakeConnector {
    type Session = FakeSession;

    fn open(&self, site_url: &str) -> Result<FakeSession> {
        if self.unreachable.iter().any(|url| url == site_url) {
            bail!("cannot reach {site_url}");
        }
        Ok(FakeServer::session(&self.server, site_url))
    }
}

/// Records site-collection calls instead of sending SOAP envelopes.
#[derive(Default)]
pub struct RecordingAdmin {
    pub calls: RefCell<Vec<String>>,
    pub fail: bool,
}

impl AdminApi for RecordingAdmin {
    fn create_site_collection(&self, info: &SiteCollectionCreation) -> Result<String> {
        if self.fail {
            bail!("admin service rejected CreateSite");
        }
        self.calls
            .borrow_mut()
            .push(format!("create {} owner={} lcid={}", info.url, info.owner_login, info.lcid));
        Ok("<CreateSiteResult/>".to_string())
    }

    fn delete_site_collection(&self, url: &str) -> Result<String> {
        if self.fail {
            bail!("admin service rejected DeleteSite");
        }
        self.calls.borrow_mut().push(format!("delete {url}"));
        Ok("<DeleteSiteResponse/>".to_string())
    }
}
