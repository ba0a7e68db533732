use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, info_span};

use crate::action::{
    Action, AddUserToFolderPermissions, BreakRoleInheritance, CreateFolder, CreateGroup,
    CreateList, CreateListItem, CreateListItemAttachment, CreateRoleAssignment, CreateSite,
    CreateSiteCollection, CreateTextDocument, CreateUser, DeleteFolder, DeleteGroup,
    DeleteListItem, DeleteListItemAttachment, DeleteRoleAssignment, GroupMembership, Principal,
    ResetRoleInheritance, SetNoIndex, UpdateUser, parse_actions,
};
use crate::admin::{AdminApi, SiteCollectionCreation};
use crate::auth::downgrade_to_http;
use crate::folders::{ensure_folder, ensure_folder_reusing};
use crate::remote::{
    ContentApi, GroupHandle, GroupRef, ListCreation, SessionFactory, TargetScope, UserCreation,
    WebCreation,
};
use crate::resolver::{OperationFamily, resolve, resolve_item, resolve_list};

/// Remote endpoints a run talks to.
pub struct EngineContext<'a, F, A> {
    pub sessions: &'a F,
    pub admin: &'a A,
}

/// Results collected before the run stopped, and the error that stopped it.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<String>,
    pub error: Option<anyhow::Error>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.results),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub output_path: PathBuf,
    pub results: Vec<String>,
}

/// Execute actions in order, stopping at the first failure.
pub fn run_actions<F, A>(ctx: &EngineContext<'_, F, A>, actions: &[Action]) -> RunOutcome
where
    F: SessionFactory,
    A: AdminApi,
{
    let mut results = Vec::with_capacity(actions.len());
    for (position, action) in actions.iter().enumerate() {
        let index = position + 1;
        let span = info_span!("action", index, kind = action.type_name());
        let _entered = span.enter();
        match execute(ctx, action) {
            Ok(result) => {
                info!(result = %result, "action completed");
                results.push(result);
            }
            Err(failure) => {
                error!(error = %format!("{failure:#}"), "action failed; stopping run");
                return RunOutcome {
                    results,
                    error: Some(
                        failure.context(format!("action #{index} ({}) failed", action.type_name())),
                    ),
                };
            }
        }
    }
    RunOutcome {
        results,
        error: None,
    }
}

/// `<action file>.out`
pub fn output_path_for(action_file: &Path) -> PathBuf {
    let mut name = action_file.as_os_str().to_owned();
    name.push(".out");
    PathBuf::from(name)
}

/// One result per line, each terminated by a newline.
pub fn write_results(path: &Path, results: &[String]) -> Result<()> {
    let mut rendered = String::new();
    for result in results {
        rendered.push_str(result);
        rendered.push('\n');
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

/// Load, validate and run an action file. Results gathered so far are written
/// next to it even when an action fails; the failure is returned afterwards.
pub fn run_action_file<F, A>(ctx: &EngineContext<'_, F, A>, action_file: &Path) -> Result<RunSummary>
where
    F: SessionFactory,
    A: AdminApi,
{
    let json = fs::read_to_string(action_file)
        .with_context(|| format!("failed to read {}", action_file.display()))?;
    let actions = parse_actions(&json)
        .with_context(|| format!("failed to load actions from {}", action_file.display()))?;
    info!(count = actions.len(), file = %action_file.display(), "loaded actions");

    let outcome = run_actions(ctx, &actions);
    let output_path = output_path_for(action_file);
    let written = write_results(&output_path, &outcome.results);
    if let Some(failure) = outcome.error {
        if let Err(write_error) = written {
            error!(error = %format!("{write_error:#}"), "could not flush partial results");
        }
        return Err(failure);
    }
    written?;
    info!(
        count = outcome.results.len(),
        output = %output_path.display(),
        "wrote results"
    );
    Ok(RunSummary {
        output_path,
        results: outcome.results,
    })
}

fn with_session<F, T>(
    sessions: &F,
    site_url: &str,
    operation: impl FnOnce(&mut F::Session) -> Result<T>,
) -> Result<T>
where
    F: SessionFactory,
{
    let mut session = sessions
        .open(site_url)
        .with_context(|| format!("failed to open a session for {site_url}"))?;
    operation(&mut session)
}

fn execute<F, A>(ctx: &EngineContext<'_, F, A>, action: &Action) -> Result<String>
where
    F: SessionFactory,
    A: AdminApi,
{
    let sessions = ctx.sessions;
    match action {
        Action::CreateSiteCollection(action) => create_site_collection(ctx.admin, action),
        Action::DeleteSiteCollection(action) => {
            let url = downgrade_to_http(&action.url);
            ctx.admin.delete_site_collection(&url)?;
            info!(url = %url, "deleted site collection");
            Ok(String::new())
        }
        Action::CreateSite(action) => {
            with_session(sessions, &action.parent_site_url, |s| create_site(s, action))
        }
        Action::DeleteSite(action) => with_session(sessions, &action.url, |s| {
            s.delete_web()?;
            info!(url = %action.url, "deleted site");
            Ok(String::new())
        }),
        Action::CreateList(action) => {
            with_session(sessions, &action.parent_site_url, |s| create_list(s, action))
        }
        Action::DeleteList(action) => with_session(sessions, &action.parent_site_url, |s| {
            let list = resolve_list(s, action.guid)?;
            s.delete_list(&list)?;
            info!(list = %action.guid, "deleted list");
            Ok(String::new())
        }),
        Action::CreateListItem(action) => {
            with_session(sessions, &action.parent_site_url, |s| create_list_item(s, action))
        }
        Action::DeleteListItem(action) => {
            with_session(sessions, &action.parent_site_url, |s| delete_list_item(s, action))
        }
        Action::CreateListItemAttachment(action) => {
            with_session(sessions, &action.parent_site_url, |s| add_attachment(s, action))
        }
        Action::DeleteListItemAttachment(action) => {
            with_session(sessions, &action.parent_site_url, |s| delete_attachment(s, action))
        }
        Action::CreateFolder(action) => {
            with_session(sessions, &action.parent_site_url, |s| create_folder(s, action))
        }
        Action::DeleteFolder(action) => {
            with_session(sessions, &action.parent_site_url, |s| delete_folder(s, action))
        }
        Action::CreateTextDocument(action) => {
            with_session(sessions, &action.parent_site_url, |s| create_text_document(s, action))
        }
        Action::CreateGroup(action) => {
            with_session(sessions, &action.site_collection_url, |s| create_group(s, action))
        }
        Action::DeleteGroup(action) => {
            with_session(sessions, &action.site_collection_url, |s| delete_group(s, action))
        }
        Action::CreateUser(action) => {
            with_session(sessions, &action.site_collection_url, |s| create_user(s, action))
        }
        Action::UpdateUser(action) => {
            with_session(sessions, &action.site_collection_url, |s| update_user(s, action))
        }
        Action::AddUserToSharepointGroup(action) => {
            with_session(sessions, &action.site_collection_url, |s| add_to_group(s, action))
        }
        Action::RemoveUserFromSharepointGroup(action) => {
            with_session(sessions, &action.site_collection_url, |s| remove_from_group(s, action))
        }
        Action::CreateRoleAssignment(action) => {
            with_session(sessions, &action.site_url, |s| create_role_assignment(s, action))
        }
        Action::DeleteRoleAssignment(action) => {
            with_session(sessions, &action.site_url, |s| delete_role_assignment(s, action))
        }
        Action::BreakRoleInheritance(action) => {
            with_session(sessions, &action.site_url, |s| break_inheritance(s, action))
        }
        Action::ResetRoleInheritance(action) => {
            with_session(sessions, &action.site_url, |s| reset_inheritance(s, action))
        }
        Action::AddUserToFolderPermissions(action) => {
            with_session(sessions, &action.parent_site_url, |s| {
                add_user_to_folder_permissions(s, action)
            })
        }
        Action::SetNoIndex(action) => {
            with_session(sessions, &action.site_url, |s| set_no_index(s, action))
        }
    }
}

fn create_site_collection<A: AdminApi>(admin: &A, action: &CreateSiteCollection) -> Result<String> {
    let info = SiteCollectionCreation {
        url: downgrade_to_http(&action.url),
        title: action.title.clone(),
        description: action.description.clone(),
        owner_login: action.user.clone(),
        lcid: action.lcid.clone(),
        web_template: action.web_template.clone(),
    };
    admin.create_site_collection(&info)?;
    info!(url = %info.url, "created site collection");
    Ok(String::new())
}

fn create_site<S: ContentApi + ?Sized>(session: &mut S, action: &CreateSite) -> Result<String> {
    let id = session.create_web(&WebCreation {
        url: action.url.clone(),
        title: action.title.clone(),
        description: action.description.clone(),
        web_template: action.web_template().to_string(),
        language: action.language(),
        use_same_permissions_as_parent: action.use_same_permissions_as_parent_site,
    })?;
    info!(url = %action.url, id = %id, "created site");
    Ok(id.to_string())
}

fn create_list<S: ContentApi + ?Sized>(session: &mut S, action: &CreateList) -> Result<String> {
    let id = session.create_list(&ListCreation {
        title: action.title.clone(),
        description: action.description.clone(),
        template_type: action.list_template_name.type_id(),
    })?;
    info!(title = %action.title, id = %id, "created list");
    Ok(id.to_string())
}

fn create_list_item<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &CreateListItem,
) -> Result<String> {
    let list = resolve_list(session, action.list_guid)?;
    let id = session.create_item(&list, &action.columns)?;
    info!(list = %action.list_guid, id, "created list item");
    Ok(id.to_string())
}

fn delete_list_item<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &DeleteListItem,
) -> Result<String> {
    let item = resolve_item(session, action.list_guid, action.item_id)?;
    session.delete_item(&item)?;
    info!(list = %action.list_guid, id = action.item_id, "deleted list item");
    Ok(String::new())
}

fn add_attachment<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &CreateListItemAttachment,
) -> Result<String> {
    let content = fs::read(&action.file_path)
        .with_context(|| format!("failed to read attachment source {}", action.file_path))?;
    let item = resolve_item(session, action.list_guid, action.item_id)?;
    session.add_attachment(&item, &action.file_name, content)?;
    info!(item = action.item_id, file = %action.file_name, "added attachment");
    Ok(String::new())
}

fn delete_attachment<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &DeleteListItemAttachment,
) -> Result<String> {
    let item = resolve_item(session, action.list_guid, action.item_id)?;
    session.delete_attachment(&item, &action.file_name)?;
    info!(item = action.item_id, file = %action.file_name, "deleted attachment");
    Ok(String::new())
}

fn create_folder<S: ContentApi + ?Sized>(session: &mut S, action: &CreateFolder) -> Result<String> {
    let list = resolve_list(session, action.list_guid)?;
    let id = match action.parent_folder.as_deref() {
        Some(parent) => {
            let parent = session.get_folder(&list.folder_url(parent))?;
            let folder = if action.reuse_existing {
                ensure_folder_reusing(session, &parent, &action.folder_name)?
            } else {
                ensure_folder(session, &parent, &action.folder_name)?
            };
            session.folder_item_id(&folder)?
        }
        None => {
            let existing = if action.reuse_existing {
                session
                    .child_folders(&list.root_folder)?
                    .into_iter()
                    .find(|folder| folder.name.eq_ignore_ascii_case(&action.folder_name))
            } else {
                None
            };
            match existing {
                Some(folder) => session.folder_item_id(&folder)?,
                None => session.create_folder_item(&list, &action.folder_name)?,
            }
        }
    };
    info!(folder = %action.folder_name, id, "created folder");
    Ok(id.to_string())
}

fn delete_folder<S: ContentApi + ?Sized>(session: &mut S, action: &DeleteFolder) -> Result<String> {
    let list = resolve_list(session, action.list_guid)?;
    let folder = session.get_folder(&list.folder_url(&action.folder_url))?;
    session.delete_folder(&folder)?;
    info!(folder = %folder.server_relative_url, "deleted folder");
    Ok(String::new())
}

fn create_text_document<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &CreateTextDocument,
) -> Result<String> {
    let list = resolve_list(session, action.list_guid)?;
    let folder = match action.parent_folder.as_deref() {
        Some(parent) => session.get_folder(&list.folder_url(parent))?,
        None => list.root_folder.clone(),
    };
    let item = session.add_file(&list, &folder, &action.file_name, action.text.as_bytes().to_vec())?;
    session.set_item_title(&item, &action.title)?;
    info!(file = %action.file_name, id = item.id, "created text document");
    Ok(item.id.to_string())
}

fn create_group<S: ContentApi + ?Sized>(session: &mut S, action: &CreateGroup) -> Result<String> {
    let group = session.create_group(&action.title, &action.description)?;
    if let Some(role) = action.granted_role() {
        let root_web_url = session.site_context()?.root_web_url;
        session.add_role_assignment(&TargetScope::SiteCollection { root_web_url }, group.id, role)?;
    }
    info!(title = %action.title, id = group.id, "created group");
    Ok(group.id.to_string())
}

fn delete_group<S: ContentApi + ?Sized>(session: &mut S, action: &DeleteGroup) -> Result<String> {
    let group = action.group().map_err(|reason| anyhow!(reason))?;
    session.delete_group(group)?;
    info!(group = ?group, "deleted group");
    Ok(String::new())
}

fn create_user<S: ContentApi + ?Sized>(session: &mut S, action: &CreateUser) -> Result<String> {
    let user = session.create_user(&UserCreation {
        login_name: action.login_name.clone(),
        title: action.title.clone(),
        email: action.email.clone(),
    })?;
    if action.is_site_admin {
        session.set_site_admin(&user, true)?;
    }
    info!(login = %user.login_name, id = user.id, "created user");
    Ok(user.id.to_string())
}

fn update_user<S: ContentApi + ?Sized>(session: &mut S, action: &UpdateUser) -> Result<String> {
    let user = session.ensure_user(&action.login_name)?;
    session.set_site_admin(&user, action.is_site_admin)?;
    info!(login = %user.login_name, admin = action.is_site_admin, "updated user");
    Ok(String::new())
}

fn membership_group<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &GroupMembership,
) -> Result<GroupHandle> {
    let group = action.group().map_err(|reason| anyhow!(reason))?;
    session.get_group(group)
}

fn add_to_group<S: ContentApi + ?Sized>(session: &mut S, action: &GroupMembership) -> Result<String> {
    let user = session.ensure_user(&action.login_name)?;
    let group = membership_group(session, action)?;
    session.add_group_member(&group, &user)?;
    info!(login = %user.login_name, group = group.id, "added user to group");
    Ok(user.login_name)
}

fn remove_from_group<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &GroupMembership,
) -> Result<String> {
    let group = membership_group(session, action)?;
    session.remove_group_member(&group, &action.login_name)?;
    info!(login = %action.login_name, group = group.id, "removed user from group");
    Ok(String::new())
}

fn create_role_assignment<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &CreateRoleAssignment,
) -> Result<String> {
    let principal = action.principal().map_err(|reason| anyhow!(reason))?;
    let scope = resolve(
        session,
        OperationFamily::RoleAssignment,
        &action.target,
        &action.scope_keys(),
    )?;
    let principal_id = match principal {
        Principal::User(login) => session.ensure_user(login)?.id,
        Principal::Group(name) => session.get_group(GroupRef::Name(name))?.id,
    };
    let id = session.add_role_assignment(&scope, principal_id, action.role)?;
    info!(scope = %scope.describe(), principal = id, role = ?action.role, "created role assignment");
    Ok(id.to_string())
}

fn delete_role_assignment<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &DeleteRoleAssignment,
) -> Result<String> {
    let scope = resolve(
        session,
        OperationFamily::RoleAssignment,
        &action.target,
        &action.scope_keys(),
    )?;
    session.delete_role_assignment(&scope, action.principal_id)?;
    info!(scope = %scope.describe(), principal = action.principal_id, "deleted role assignment");
    Ok(String::new())
}

fn break_inheritance<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &BreakRoleInheritance,
) -> Result<String> {
    let scope = resolve(
        session,
        OperationFamily::Inheritance,
        &action.target,
        &action.scope_keys(),
    )?;
    session.break_role_inheritance(&scope, action.copy_role_assignments, action.clear_sub_scopes)?;
    info!(scope = %scope.describe(), "broke role inheritance");
    Ok(String::new())
}

fn reset_inheritance<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &ResetRoleInheritance,
) -> Result<String> {
    let scope = resolve(
        session,
        OperationFamily::Inheritance,
        &action.target,
        &action.scope_keys(),
    )?;
    session.reset_role_inheritance(&scope)?;
    info!(scope = %scope.describe(), "reset role inheritance");
    Ok(String::new())
}

fn add_user_to_folder_permissions<S: ContentApi + ?Sized>(
    session: &mut S,
    action: &AddUserToFolderPermissions,
) -> Result<String> {
    let scope = TargetScope::ListItem(resolve_item(session, action.list_guid, action.folder_id)?);
    session.break_role_inheritance(&scope, false, true)?;
    let user = session.ensure_user(&action.user)?;
    let id = session.add_role_assignment(&scope, user.id, action.role())?;
    info!(folder = action.folder_id, login = %user.login_name, "granted folder permission");
    Ok(id.to_string())
}

fn set_no_index<S: ContentApi + ?Sized>(session: &mut S, action: &SetNoIndex) -> Result<String> {
    let scope = resolve(
        session,
        OperationFamily::NoIndex,
        &action.target,
        &action.scope_keys(),
    )?;
    session.set_no_crawl(&scope, action.value)?;
    info!(scope = %scope.describe(), value = action.value, "set no-index");
    Ok(String::new())
}
