//! An in-memory `Registry` used by integration tests across the workspace,
//! mirroring the donor project's mock-handler pattern for exercising the
//! state machine without a live database.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::{
    cache::RoutingCache,
    error::{Error, Result},
    model::{FindDeviceQuery, PrincipalKind, ResourceLink, TokenGrant},
    store::{Registry, RegistryOptions},
    token::generate_token,
};

#[derive(Default, Clone)]
struct PrincipalRow {
    user_id: String,
    access_token: String,
    refresh_token: Option<String>,
    published_resources: Json,
}

#[derive(Default)]
struct State {
    next_user_id: i64,
    users: HashMap<String, String>,
    mediators: HashMap<String, String>,
    devices: HashMap<String, PrincipalRow>,
    clients: HashMap<String, PrincipalRow>,
}

pub struct InMemoryRegistry {
    state: Mutex<State>,
    cache: Arc<dyn RoutingCache>,
    options: RegistryOptions,
}

impl InMemoryRegistry {
    pub fn new(cache: Arc<dyn RoutingCache>, options: RegistryOptions) -> Self {
        Self { state: Mutex::new(State::default()), cache, options }
    }

    fn table(state: &mut State, kind: PrincipalKind) -> &mut HashMap<String, PrincipalRow> {
        match kind {
            PrincipalKind::Device => &mut state.devices,
            PrincipalKind::Client => &mut state.clients,
        }
    }
}

#[async_trait::async_trait]
impl Registry for InMemoryRegistry {
    async fn register_user(&self, username: &str, _auth_provider: &str) -> Result<String> {
        let mut state = self.state.lock();
        if state.users.contains_key(username) {
            return Err(Error::Conflict("username taken".into()));
        }
        let token = generate_token(self.options.token_entropy_bytes);
        state.users.insert(username.to_string(), token.clone());
        Ok(token)
    }

    async fn provision_mediator(&self, username: &str, user_token: &str) -> Result<String> {
        let mut state = self.state.lock();
        match state.users.get(username) {
            Some(t) if t == user_token => {}
            Some(_) => return Err(Error::Unauthorized("userToken mismatch".into())),
            None => return Err(Error::NotFound),
        }
        let mediator_token = generate_token(self.options.token_entropy_bytes);
        state.mediators.insert(mediator_token.clone(), username.to_string());
        Ok(mediator_token)
    }

    async fn provision_principal(
        &self,
        kind: PrincipalKind,
        uuid: &str,
        mediator_token: &str,
    ) -> Result<String> {
        let mut state = self.state.lock();
        let username = state
            .mediators
            .get(mediator_token)
            .cloned()
            .ok_or(Error::NotFound)?;
        state.next_user_id += 1;
        let user_id = state.next_user_id.to_string();
        let one_time = generate_token(self.options.token_entropy_bytes);
        let _ = username;
        Self::table(&mut state, kind).insert(
            uuid.to_string(),
            PrincipalRow {
                user_id,
                access_token: one_time.clone(),
                refresh_token: None,
                published_resources: Json::Null,
            },
        );
        Ok(one_time)
    }

    async fn register_principal(
        &self,
        kind: PrincipalKind,
        uuid: &str,
        one_time_access_token: &str,
    ) -> Result<TokenGrant> {
        let mut state = self.state.lock();
        let row = Self::table(&mut state, kind).get_mut(uuid).ok_or(Error::NotFound)?;
        if row.access_token != one_time_access_token {
            return Err(Error::Unauthorized("access token mismatch".into()));
        }

        row.access_token = generate_token(self.options.token_entropy_bytes);
        row.refresh_token = Some(generate_token(self.options.token_entropy_bytes));

        Ok(TokenGrant {
            access_token: row.access_token.clone(),
            user_id: row.user_id.clone(),
            refresh_token: row.refresh_token.clone().unwrap(),
            ttl_secs: self.options.access_token_ttl_secs,
        })
    }

    async fn refresh_token(
        &self,
        kind: PrincipalKind,
        principal_id: &str,
        user_id: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant> {
        let mut state = self.state.lock();
        let row = Self::table(&mut state, kind).get_mut(principal_id).ok_or(Error::NotFound)?;
        if row.user_id != user_id || row.refresh_token.as_deref() != Some(refresh_token) {
            return Err(Error::NotFound);
        }

        row.access_token = generate_token(self.options.token_entropy_bytes);
        if matches!(self.options.refresh_token_policy, crate::store::RefreshTokenPolicy::Rotate) {
            row.refresh_token = Some(generate_token(self.options.token_entropy_bytes));
        }

        Ok(TokenGrant {
            access_token: row.access_token.clone(),
            user_id: row.user_id.clone(),
            refresh_token: row.refresh_token.clone().unwrap(),
            ttl_secs: self.options.access_token_ttl_secs,
        })
    }

    async fn update_session(
        &self,
        device_id: &str,
        user_id: &str,
        access_token: &str,
        pod_addr: &str,
        logged_in: bool,
    ) -> Result<u64> {
        {
            let mut state = self.state.lock();
            let row = state.devices.get_mut(device_id).ok_or(Error::NotFound)?;
            if row.user_id != user_id || row.access_token != access_token {
                return Err(Error::Unauthorized("access token mismatch".into()));
            }
        }

        if logged_in {
            let ttl = self.options.access_token_ttl_secs;
            self.cache
                .set_pod(device_id, pod_addr, std::time::Duration::from_secs(ttl))
                .await?;
            Ok(ttl)
        } else {
            self.cache.clear_pod(device_id).await?;
            Ok(0)
        }
    }

    async fn publish_resource(&self, device_id: &str, resources: Json) -> Result<()> {
        let mut state = self.state.lock();
        let row = state.devices.get_mut(device_id).ok_or(Error::NotFound)?;
        row.published_resources = resources;
        Ok(())
    }

    async fn find_device(&self, user_id: &str, query: &FindDeviceQuery) -> Result<Vec<ResourceLink>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (device_id, row) in state.devices.iter() {
            if row.user_id != user_id {
                continue;
            }
            out.extend(crate::store::filter_links(device_id, &row.published_resources, query));
        }
        Ok(out)
    }

    async fn delete_principal(
        &self,
        kind: PrincipalKind,
        id: &str,
        access_token: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let table = Self::table(&mut state, kind);
        match table.get(id) {
            Some(row) if row.access_token == access_token => {
                table.remove(id);
                Ok(())
            }
            Some(_) => Err(Error::Unauthorized("access token mismatch".into())),
            None => Err(Error::NotFound),
        }
    }
}
