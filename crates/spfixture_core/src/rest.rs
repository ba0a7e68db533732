use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::admin::xml_escape;
use crate::auth::{
    ClaimsCredential, Credentials, FORMS_AUTH_HEADER, FORMS_AUTH_VALUE, NetworkCredential,
    downgrade_to_http,
};
use crate::error::RemoteError;
use crate::remote::{
    ContentApi, FolderHandle, GroupHandle, GroupRef, ItemHandle, ListCreation, ListHandle,
    RoleType, SessionFactory, SiteContext, TargetScope, UserCreation, UserHandle, WebCreation,
};

pub const DEFAULT_STS_URL: &str = "https://login.microsoftonline.com/extSTS.srf";
const ODATA_ACCEPT: &str = "application/json;odata=nometadata";
const ODATA_VERBOSE: &str = "application/json;odata=verbose";
const SIGN_IN_PATH: &str = "/_forms/default.aspx";

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub sts_url: String,
}

/// Opens REST sessions with one set of credentials.
pub struct RestConnector {
    credentials: Credentials,
    settings: HttpSettings,
}

impl RestConnector {
    pub fn new(credentials: Credentials, settings: HttpSettings) -> Self {
        Self {
            credentials,
            settings,
        }
    }

    fn build_client(&self, jar: &Arc<Jar>) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(FORMS_AUTH_HEADER.as_bytes())
                .context("invalid forms authentication header name")?,
            HeaderValue::from_static(FORMS_AUTH_VALUE),
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ODATA_ACCEPT));
        Client::builder()
            .user_agent(self.settings.user_agent.clone())
            .timeout(self.settings.timeout)
            .cookie_provider(Arc::clone(jar))
            .default_headers(headers)
            .build()
            .context("failed to build SharePoint HTTP client")
    }
}

impl SessionFactory for RestConnector {
    type Session = RestSession;

    fn open(&self, site_url: &str) -> Result<RestSession> {
        let site_url = match &self.credentials {
            Credentials::Network(_) => downgrade_to_http(site_url),
            Credentials::Claims(_) => site_url.to_string(),
        };
        let site = Url::parse(site_url.trim_end_matches('/'))
            .with_context(|| format!("invalid site URL: {site_url}"))?;
        let jar = Arc::new(Jar::default());
        let client = self.build_client(&jar)?;

        let network = match &self.credentials {
            Credentials::Network(credential) => Some(credential.clone()),
            Credentials::Claims(credential) => {
                sign_in(&client, &jar, &site, credential, &self.settings.sts_url)?;
                None
            }
        };
        debug!(site = %site, scheme = self.credentials.scheme(), "opened session");
        Ok(RestSession {
            client,
            base: site.as_str().trim_end_matches('/').to_string(),
            network,
            digest: None,
            request_count: 0,
        })
    }
}

/// One authenticated conversation with a site. Dropping it releases the
/// connection pool and cookies.
pub struct RestSession {
    client: Client,
    base: String,
    network: Option<NetworkCredential>,
    digest: Option<String>,
    request_count: usize,
}

impl Drop for RestSession {
    fn drop(&mut self) {
        debug!(site = %self.base, requests = self.request_count, "released session");
    }
}

enum Body {
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
}

/// OData string literal: single-quoted with embedded quotes doubled.
pub fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContextInfo {
    form_digest_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UrlPayload {
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GuidPayload {
    id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdPayload {
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPayload {
    id: Uuid,
    list_item_entity_type_full_name: String,
    root_folder: FolderPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderPayload {
    name: String,
    server_relative_url: String,
}

impl From<FolderPayload> for FolderHandle {
    fn from(payload: FolderPayload) -> Self {
        Self {
            name: payload.name,
            server_relative_url: payload.server_relative_url,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FilePayload {
    server_relative_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PrincipalPayload {
    id: i64,
    login_name: String,
}

#[derive(Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

fn decode<T: DeserializeOwned>(value: Value, operation: &str) -> Result<T> {
    serde_json::from_value(value).with_context(|| format!("unexpected {operation} response shape"))
}

fn list_path(id: Uuid) -> String {
    format!("_api/web/lists(guid'{id}')")
}

fn scope_path(scope: &TargetScope) -> String {
    match scope {
        TargetScope::SiteCollection { .. } => "_api/site/rootweb".to_string(),
        TargetScope::Site { .. } => "_api/web".to_string(),
        TargetScope::List(list) => list_path(list.id),
        TargetScope::ListItem(item) => format!("{}/items({})", list_path(item.list_id), item.id),
    }
}

fn group_path(group: GroupRef<'_>) -> (String, Option<&str>) {
    match group {
        GroupRef::Id(id) => (format!("_api/web/sitegroups/getbyid({id})"), None),
        GroupRef::Name(name) => ("_api/web/sitegroups/getbyname(@g)".to_string(), Some(name)),
    }
}

impl RestSession {
    /// Absolute URL for an `_api` path; aliases become quoted OData query
    /// parameters so names never need escaping inside the path.
    fn endpoint(&self, path: &str, aliases: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base, path))
            .with_context(|| format!("invalid REST path: {path}"))?;
        if !aliases.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in aliases {
                pairs.append_pair(name, &odata_literal(value));
            }
        }
        Ok(url)
    }

    fn execute(&mut self, request: RequestBuilder, operation: &str) -> Result<Value> {
        self.request_count += 1;
        let request = match &self.network {
            Some(credential) => {
                request.basic_auth(credential.qualified_username(), Some(&credential.password))
            }
            None => request,
        };
        let response = request
            .send()
            .with_context(|| format!("failed to call {operation}"))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("failed to read {operation} response"))?;
        if !status.is_success() {
            return Err(RemoteError::Transport {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }
        debug!(operation, status = status.as_u16(), "request completed");
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).with_context(|| format!("failed to decode {operation} response"))
    }

    fn get(&mut self, path: &str, aliases: &[(&str, &str)], operation: &str) -> Result<Value> {
        let url = self.endpoint(path, aliases)?;
        let request = self.client.get(url);
        self.execute(request, operation)
    }

    fn form_digest(&mut self) -> Result<String> {
        if let Some(digest) = &self.digest {
            return Ok(digest.clone());
        }
        let url = self.endpoint("_api/contextinfo", &[])?;
        let request = self.client.post(url).body(Vec::new());
        let info: ContextInfo = decode(self.execute(request, "contextinfo")?, "contextinfo")?;
        self.digest = Some(info.form_digest_value.clone());
        Ok(info.form_digest_value)
    }

    fn post(
        &mut self,
        path: &str,
        aliases: &[(&str, &str)],
        body: Body,
        method: Option<&str>,
        operation: &str,
    ) -> Result<Value> {
        let digest = self.form_digest()?;
        let url = self.endpoint(path, aliases)?;
        let mut request = self.client.post(url).header("X-RequestDigest", digest);
        if let Some(method) = method {
            request = request.header("X-HTTP-Method", method).header("IF-MATCH", "*");
        }
        let request = match body {
            Body::Empty => request.body(Vec::new()),
            Body::Json(value) => request
                .header(CONTENT_TYPE, ODATA_VERBOSE)
                .body(value.to_string()),
            Body::Bytes(bytes) => request.body(bytes),
        };
        self.execute(request, operation)
    }

    fn merge(&mut self, path: &str, entity_type: &str, mut fields: Map<String, Value>, operation: &str) -> Result<()> {
        fields.insert("__metadata".to_string(), json!({ "type": entity_type }));
        self.post(path, &[], Body::Json(Value::Object(fields)), Some("MERGE"), operation)?;
        Ok(())
    }

    fn delete(&mut self, path: &str, aliases: &[(&str, &str)], operation: &str) -> Result<()> {
        self.post(path, aliases, Body::Empty, Some("DELETE"), operation)?;
        Ok(())
    }

    fn role_definition_id(&mut self, role: RoleType) -> Result<i64> {
        let path = format!(
            "_api/site/rootweb/roledefinitions/getbytype({})?$select=Id",
            role.type_id()
        );
        let payload: IdPayload = decode(self.get(&path, &[], "get role definition")?, "role definition")?;
        Ok(payload.id)
    }
}

impl ContentApi for RestSession {
    fn site_context(&mut self) -> Result<SiteContext> {
        let web: UrlPayload = decode(self.get("_api/web?$select=Url", &[], "get web")?, "web")?;
        let root: UrlPayload = decode(
            self.get("_api/site/rootweb?$select=Url", &[], "get root web")?,
            "root web",
        )?;
        Ok(SiteContext {
            web_url: web.url,
            root_web_url: root.url,
        })
    }

    fn create_web(&mut self, info: &WebCreation) -> Result<Uuid> {
        let body = json!({
            "parameters": {
                "__metadata": { "type": "SP.WebCreationInformation" },
                "Url": info.url,
                "Title": info.title,
                "Description": info.description,
                "WebTemplate": info.web_template,
                "Language": info.language,
                "UseSamePermissionsAsParentSite": info.use_same_permissions_as_parent,
            }
        });
        let web: GuidPayload = decode(
            self.post("_api/web/webs/add", &[], Body::Json(body), None, "create web")?,
            "create web",
        )?;
        Ok(web.id)
    }

    fn delete_web(&mut self) -> Result<()> {
        self.delete("_api/web", &[], "delete web")
    }

    fn create_list(&mut self, info: &ListCreation) -> Result<Uuid> {
        let body = json!({
            "__metadata": { "type": "SP.List" },
            "AllowContentTypes": true,
            "BaseTemplate": info.template_type,
            "Title": info.title,
            "Description": info.description,
        });
        let list: GuidPayload = decode(
            self.post("_api/web/lists", &[], Body::Json(body), None, "create list")?,
            "create list",
        )?;
        Ok(list.id)
    }

    fn get_list(&mut self, id: Uuid) -> Result<ListHandle> {
        let path = format!(
            "{}?$select=Id,ListItemEntityTypeFullName,RootFolder/Name,RootFolder/ServerRelativeUrl&$expand=RootFolder",
            list_path(id)
        );
        let list: ListPayload = decode(self.get(&path, &[], "get list")?, "list")?;
        Ok(ListHandle {
            id: list.id,
            root_folder: list.root_folder.into(),
            item_entity_type: list.list_item_entity_type_full_name,
        })
    }

    fn delete_list(&mut self, list: &ListHandle) -> Result<()> {
        self.delete(&list_path(list.id), &[], "delete list")
    }

    fn get_item(&mut self, list: &ListHandle, item_id: i64) -> Result<ItemHandle> {
        let path = format!("{}/items({item_id})?$select=Id", list_path(list.id));
        let item: IdPayload = decode(self.get(&path, &[], "get list item")?, "list item")?;
        Ok(ItemHandle {
            list_id: list.id,
            item_entity_type: list.item_entity_type.clone(),
            id: item.id,
        })
    }

    fn create_item(&mut self, list: &ListHandle, columns: &Map<String, Value>) -> Result<i64> {
        let mut fields = columns.clone();
        fields.insert(
            "__metadata".to_string(),
            json!({ "type": list.item_entity_type }),
        );
        let path = format!("{}/items", list_path(list.id));
        let item: IdPayload = decode(
            self.post(&path, &[], Body::Json(Value::Object(fields)), None, "create list item")?,
            "create list item",
        )?;
        Ok(item.id)
    }

    fn create_folder_item(&mut self, list: &ListHandle, leaf_name: &str) -> Result<i64> {
        let folder = self.add_folder(&list.root_folder, leaf_name)?;
        let id = self.folder_item_id(&folder)?;
        let item = ItemHandle {
            list_id: list.id,
            item_entity_type: list.item_entity_type.clone(),
            id,
        };
        self.set_item_title(&item, leaf_name)?;
        Ok(id)
    }

    fn set_item_title(&mut self, item: &ItemHandle, title: &str) -> Result<()> {
        let path = format!("{}/items({})", list_path(item.list_id), item.id);
        let mut fields = Map::new();
        fields.insert("Title".to_string(), Value::String(title.to_string()));
        self.merge(&path, &item.item_entity_type, fields, "set item title")
    }

    fn delete_item(&mut self, item: &ItemHandle) -> Result<()> {
        let path = format!("{}/items({})", list_path(item.list_id), item.id);
        self.delete(&path, &[], "delete list item")
    }

    fn add_attachment(&mut self, item: &ItemHandle, file_name: &str, content: Vec<u8>) -> Result<()> {
        let path = format!(
            "{}/items({})/AttachmentFiles/add(FileName=@f)",
            list_path(item.list_id),
            item.id
        );
        self.post(&path, &[("@f", file_name)], Body::Bytes(content), None, "add attachment")?;
        Ok(())
    }

    fn delete_attachment(&mut self, item: &ItemHandle, file_name: &str) -> Result<()> {
        let path = format!(
            "{}/items({})/AttachmentFiles/getByFileName(@f)",
            list_path(item.list_id),
            item.id
        );
        self.delete(&path, &[("@f", file_name)], "delete attachment")
    }

    fn get_folder(&mut self, server_relative_url: &str) -> Result<FolderHandle> {
        let folder: FolderPayload = decode(
            self.get(
                "_api/web/GetFolderByServerRelativeUrl(@u)?$select=Name,ServerRelativeUrl",
                &[("@u", server_relative_url)],
                "get folder",
            )?,
            "folder",
        )?;
        Ok(folder.into())
    }

    fn add_folder(&mut self, parent: &FolderHandle, name: &str) -> Result<FolderHandle> {
        let url = format!("{}/{name}", parent.server_relative_url.trim_end_matches('/'));
        let folder: FolderPayload = decode(
            self.post("_api/web/folders/add(@u)", &[("@u", url.as_str())], Body::Empty, None, "add folder")?,
            "add folder",
        )?;
        Ok(folder.into())
    }

    fn child_folders(&mut self, parent: &FolderHandle) -> Result<Vec<FolderHandle>> {
        let folders: Collection<FolderPayload> = decode(
            self.get(
                "_api/web/GetFolderByServerRelativeUrl(@u)/Folders?$select=Name,ServerRelativeUrl",
                &[("@u", parent.server_relative_url.as_str())],
                "list child folders",
            )?,
            "child folders",
        )?;
        Ok(folders.value.into_iter().map(FolderHandle::from).collect())
    }

    fn folder_item_id(&mut self, folder: &FolderHandle) -> Result<i64> {
        let item: IdPayload = decode(
            self.get(
                "_api/web/GetFolderByServerRelativeUrl(@u)/ListItemAllFields?$select=Id",
                &[("@u", folder.server_relative_url.as_str())],
                "get folder item",
            )?,
            "folder item",
        )?;
        Ok(item.id)
    }

    fn delete_folder(&mut self, folder: &FolderHandle) -> Result<()> {
        self.delete(
            "_api/web/GetFolderByServerRelativeUrl(@u)",
            &[("@u", folder.server_relative_url.as_str())],
            "delete folder",
        )
    }

    fn add_file(
        &mut self,
        list: &ListHandle,
        folder: &FolderHandle,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<ItemHandle> {
        let file: FilePayload = decode(
            self.post(
                "_api/web/GetFolderByServerRelativeUrl(@u)/Files/add(url=@f,overwrite=true)",
                &[("@u", folder.server_relative_url.as_str()), ("@f", file_name)],
                Body::Bytes(content),
                None,
                "upload file",
            )?,
            "upload file",
        )?;
        let item: IdPayload = decode(
            self.get(
                "_api/web/GetFileByServerRelativeUrl(@u)/ListItemAllFields?$select=Id",
                &[("@u", file.server_relative_url.as_str())],
                "get file item",
            )?,
            "file item",
        )?;
        Ok(ItemHandle {
            list_id: list.id,
            item_entity_type: list.item_entity_type.clone(),
            id: item.id,
        })
    }

    fn create_group(&mut self, title: &str, description: &str) -> Result<GroupHandle> {
        let body = json!({
            "__metadata": { "type": "SP.Group" },
            "Title": title,
            "Description": description,
        });
        let group: PrincipalPayload = decode(
            self.post("_api/web/sitegroups", &[], Body::Json(body), None, "create group")?,
            "create group",
        )?;
        Ok(GroupHandle {
            id: group.id,
            login_name: group.login_name,
        })
    }

    fn get_group(&mut self, group: GroupRef<'_>) -> Result<GroupHandle> {
        let (path, name) = group_path(group);
        let aliases = name.map(|name| vec![("@g", name)]).unwrap_or_default();
        let payload: PrincipalPayload = decode(
            self.get(&format!("{path}?$select=Id,LoginName"), &aliases, "get group")?,
            "group",
        )?;
        Ok(GroupHandle {
            id: payload.id,
            login_name: payload.login_name,
        })
    }

    fn delete_group(&mut self, group: GroupRef<'_>) -> Result<()> {
        match group {
            GroupRef::Id(id) => {
                let path = format!("_api/web/sitegroups/removebyid({id})");
                self.post(&path, &[], Body::Empty, None, "delete group")?;
            }
            GroupRef::Name(name) => {
                self.post(
                    "_api/web/sitegroups/removebyloginname(@g)",
                    &[("@g", name)],
                    Body::Empty,
                    None,
                    "delete group",
                )?;
            }
        }
        Ok(())
    }

    fn add_group_member(&mut self, group: &GroupHandle, user: &UserHandle) -> Result<()> {
        let body = json!({
            "__metadata": { "type": "SP.User" },
            "LoginName": user.login_name,
        });
        let path = format!("_api/web/sitegroups/getbyid({})/users", group.id);
        self.post(&path, &[], Body::Json(body), None, "add group member")?;
        Ok(())
    }

    fn remove_group_member(&mut self, group: &GroupHandle, login_name: &str) -> Result<()> {
        let path = format!(
            "_api/web/sitegroups/getbyid({})/users/removebyloginname(@v)",
            group.id
        );
        self.post(&path, &[("@v", login_name)], Body::Empty, None, "remove group member")?;
        Ok(())
    }

    fn create_user(&mut self, info: &UserCreation) -> Result<UserHandle> {
        let mut body = json!({
            "__metadata": { "type": "SP.User" },
            "LoginName": info.login_name,
            "Title": info.title,
        });
        if let Some(email) = &info.email {
            body["Email"] = Value::String(email.clone());
        }
        let user: PrincipalPayload = decode(
            self.post("_api/web/siteusers", &[], Body::Json(body), None, "create user")?,
            "create user",
        )?;
        Ok(UserHandle {
            id: user.id,
            login_name: user.login_name,
        })
    }

    fn ensure_user(&mut self, login_name: &str) -> Result<UserHandle> {
        let body = json!({ "logonName": login_name });
        let user: PrincipalPayload = decode(
            self.post("_api/web/ensureuser", &[], Body::Json(body), None, "ensure user")?,
            "ensure user",
        )?;
        Ok(UserHandle {
            id: user.id,
            login_name: user.login_name,
        })
    }

    fn set_site_admin(&mut self, user: &UserHandle, value: bool) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("IsSiteAdmin".to_string(), Value::Bool(value));
        self.merge(
            &format!("_api/web/getuserbyid({})", user.id),
            "SP.User",
            fields,
            "set site admin",
        )
    }

    fn add_role_assignment(
        &mut self,
        scope: &TargetScope,
        principal_id: i64,
        role: RoleType,
    ) -> Result<i64> {
        let role_id = self.role_definition_id(role)?;
        let path = format!(
            "{}/roleassignments/addroleassignment(principalid={principal_id},roledefid={role_id})",
            scope_path(scope)
        );
        self.post(&path, &[], Body::Empty, None, "add role assignment")?;
        Ok(principal_id)
    }

    fn delete_role_assignment(&mut self, scope: &TargetScope, principal_id: i64) -> Result<()> {
        let path = format!(
            "{}/roleassignments/getbyprincipalid({principal_id})",
            scope_path(scope)
        );
        self.delete(&path, &[], "delete role assignment")
    }

    fn break_role_inheritance(
        &mut self,
        scope: &TargetScope,
        copy_role_assignments: bool,
        clear_sub_scopes: bool,
    ) -> Result<()> {
        let path = format!(
            "{}/breakroleinheritance(copyRoleAssignments={copy_role_assignments},clearSubscopes={clear_sub_scopes})",
            scope_path(scope)
        );
        self.post(&path, &[], Body::Empty, None, "break role inheritance")?;
        Ok(())
    }

    fn reset_role_inheritance(&mut self, scope: &TargetScope) -> Result<()> {
        let path = format!("{}/resetroleinheritance", scope_path(scope));
        self.post(&path, &[], Body::Empty, None, "reset role inheritance")?;
        Ok(())
    }

    fn set_no_crawl(&mut self, scope: &TargetScope, value: bool) -> Result<()> {
        let entity_type = match scope {
            TargetScope::Site { .. } => "SP.Web",
            TargetScope::List(_) => "SP.List",
            other => bail!("no-crawl cannot be set on {}", other.describe()),
        };
        let mut fields = Map::new();
        fields.insert("NoCrawl".to_string(), Value::Bool(value));
        self.merge(&scope_path(scope), entity_type, fields, "set no-crawl")
    }
}

fn security_token_request(credential: &ClaimsCredential, applies_to: &str, sts_url: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:u="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
  <s:Header>
    <a:Action s:mustUnderstand="1">http://schemas.xmlsoap.org/ws/2005/02/trust/RST/Issue</a:Action>
    <a:ReplyTo><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo>
    <a:To s:mustUnderstand="1">{sts}</a:To>
    <o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <o:UsernameToken>
        <o:Username>{username}</o:Username>
        <o:Password>{password}</o:Password>
      </o:UsernameToken>
    </o:Security>
  </s:Header>
  <s:Body>
    <t:RequestSecurityToken xmlns:t="http://schemas.xmlsoap.org/ws/2005/02/trust">
      <wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
        <a:EndpointReference><a:Address>{applies_to}</a:Address></a:EndpointReference>
      </wsp:AppliesTo>
      <t:KeyType>http://schemas.xmlsoap.org/ws/2005/05/identity/NoProofKey</t:KeyType>
      <t:RequestType>http://schemas.xmlsoap.org/ws/2005/02/trust/Issue</t:RequestType>
      <t:TokenType>urn:oasis:names:tc:SAML:1.0:assertion</t:TokenType>
    </t:RequestSecurityToken>
  </s:Body>
</s:Envelope>"#,
        sts = xml_escape(sts_url),
        username = xml_escape(&credential.username),
        password = xml_escape(&credential.password),
        applies_to = xml_escape(applies_to),
    )
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn element_text<'a>(body: &'a str, local_name: &str) -> Option<&'a str> {
    let start = body.find(local_name)?;
    let open_end = start + body[start..].find('>')? + 1;
    let close = open_end + body[open_end..].find("</")?;
    let text = body[open_end..close].trim();
    (!text.is_empty()).then_some(text)
}

/// Exchange claims credentials for FedAuth cookies stored in `jar`.
fn sign_in(
    client: &Client,
    jar: &Jar,
    site: &Url,
    credential: &ClaimsCredential,
    sts_url: &str,
) -> Result<()> {
    let applies_to = site.origin().ascii_serialization();
    let response = client
        .post(sts_url)
        .header(CONTENT_TYPE, "application/soap+xml; charset=utf-8")
        .body(security_token_request(credential, &applies_to, sts_url))
        .send()
        .context("failed to reach the security token service")?;
    let status = response.status();
    let body = response
        .text()
        .context("failed to read the security token response")?;
    if !status.is_success() {
        return Err(RemoteError::Transport {
            operation: "security token request".to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }
    let Some(token) = element_text(&body, "BinarySecurityToken").map(xml_unescape) else {
        let reason = element_text(&body, "psf:text")
            .or_else(|| element_text(&body, "S:Text"))
            .unwrap_or("no security token in response");
        return Err(RemoteError::SignIn(reason.to_string()).into());
    };

    let mut sign_in_url = site.clone();
    sign_in_url.set_path(SIGN_IN_PATH);
    sign_in_url.set_query(Some("wa=wsignin1.0"));
    let response = client
        .post(sign_in_url.clone())
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(token)
        .send()
        .context("failed to post the security token")?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(RemoteError::Transport {
            operation: "claims sign-in".to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    let has_fed_auth = jar
        .cookies(&sign_in_url)
        .and_then(|header| header.to_str().map(str::to_string).ok())
        .is_some_and(|cookies| cookies.contains("FedAuth="));
    if !has_fed_auth {
        return Err(RemoteError::SignIn("server did not issue a FedAuth cookie".to_string()).into());
    }
    debug!(site = %site, "claims sign-in completed");
    Ok(())
}
