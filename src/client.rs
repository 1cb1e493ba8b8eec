//! ACME 會話：目錄快取、nonce、帳戶與金鑰表，以及所有資源操作。
//!
//! 一個 [`Client`] 就是一個獨立的會話；沒有任何全域狀態，
//! 測試中可以同時存在多個互不干擾的會話。

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::{Account, AccountError},
    authorization::Authorization,
    certificate::{Certificate, CertificateError},
    challenge::{self, Challenge, ChallengeResponder, ChallengeType, ResponderError},
    config::{ClientConfig, ConfigError},
    csr::{CsrError, CSR},
    directory::{endpoints, Directory, DirectoryError},
    jws::{self, JwsError, SignOptions, SignedJws},
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    nonce::{NonceError, NonceManager, NonceSource},
    order::{Order, OrderStatus},
    payload::{
        ChallengeValidationPayload, DeactivatePayload, FinalizeOrderPayload, KeyChangePayload,
        NewAccountPayload, NewOrderPayload, PayloadBytesError, PayloadT, RevokeCertPayload,
        UpdateAccountPayload,
    },
    poll::{self, CancelToken, PollOutcome, PollPolicy},
    resource::Resource,
    transport::{HttpResponse, HttpTransport, Problem, ReqwestTransport, TransportError, JOSE_JSON},
};

/// 會話層級的錯誤。
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("No active account")]
    NoActiveAccount,
    #[error("Account already created: {0}")]
    AccountAlreadyCreated(String),
    #[error("Account has not been created on the server")]
    AccountNotCreated,
    #[error("No account at index {0}")]
    InvalidAccountIndex(usize),
    #[error("Directory has no {0} endpoint")]
    MissingEndpoint(String),
    #[error("Resource has no {0} URL")]
    MissingUrl(&'static str),
    #[error("Unexpected HTTP status {status}, expected {expected}: {}", describe(.problem, .body))]
    UnexpectedStatus {
        expected: StatusCode,
        status: StatusCode,
        problem: Option<Problem>,
        body: String,
    },
    #[error("Response has no Location header")]
    MissingLocationHeader,
    #[error("Order is not valid")]
    OrderNotValid,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadBytesError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Challenge responder error: {0}")]
    Responder(#[from] ResponderError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Lock poisoned")]
    LockPoisoned,
}

fn describe(problem: &Option<Problem>, body: &str) -> String {
    match problem {
        Some(problem) => problem.to_string(),
        None => body.to_string(),
    }
}

impl ClientError {
    /// 簽名選項或會話設定錯誤，重試無意義。
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::NoActiveAccount
            | Self::AccountAlreadyCreated(_)
            | Self::AccountNotCreated
            | Self::InvalidAccountIndex(_)
            | Self::MissingEndpoint(_) => true,
            Self::Jws(e) => e.is_config(),
            _ => false,
        }
    }

    /// 伺服器回傳的 RFC 7807 錯誤類型，例如 `urn:ietf:params:acme:error:badNonce`。
    pub fn problem_type(&self) -> Option<&str> {
        match self {
            Self::UnexpectedStatus {
                problem: Some(problem),
                ..
            } => Some(&problem.problem_type),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// 金鑰表與帳戶表；輪替時兩者在同一把寫鎖下一起更新。
#[derive(Debug, Default)]
struct AccountTable {
    keys: HashMap<String, Arc<KeyPair>>,
    accounts: Vec<Account>,
    active: Option<usize>,
}

impl AccountTable {
    fn active(&self) -> Option<&Account> {
        self.active.and_then(|i| self.accounts.get(i))
    }

    fn active_mut(&mut self) -> Option<&mut Account> {
        let index = self.active?;
        self.accounts.get_mut(index)
    }
}

#[derive(Deserialize)]
struct StatusOnly {
    status: String,
}

/// 單一 ACME 會話。
///
/// 所有方法都只需要 `&self`：nonce 的取出與補充由 [`NonceManager`] 的鎖保證原子性，
/// 帳戶表則由讀寫鎖保護。
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    directory: Arc<Directory>,
    nonce: Arc<NonceManager>,
    table: RwLock<AccountTable>,
}

impl Client {
    /// 以 `reqwest` 傳輸層建立會話。
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// 以自訂傳輸層建立會話，測試時搭配 [`crate::transport::MockTransport`]。
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;
        let directory = Arc::new(Directory::new(
            config.directory_url.clone(),
            transport.clone(),
        ));
        let nonce = Arc::new(NonceManager::new(transport.clone(), directory.clone()));
        Ok(Self {
            config,
            transport,
            directory,
            nonce,
            table: RwLock::new(AccountTable::default()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn nonce(&self) -> &Arc<NonceManager> {
        &self.nonce
    }

    /// 立即向 `newNonce` 換取新的 nonce。
    pub fn refresh_nonce(&self) -> Result<()> {
        Ok(self.nonce.refresh()?)
    }

    /// 解析目錄端點，找不到時回傳 [`ClientError::MissingEndpoint`]。
    pub fn endpoint(&self, name: &str) -> Result<String> {
        self.directory
            .resolve(name)?
            .ok_or_else(|| ClientError::MissingEndpoint(name.to_string()))
    }

    fn read_table(&self) -> Result<RwLockReadGuard<'_, AccountTable>> {
        self.table.read().map_err(|_| ClientError::LockPoisoned)
    }

    fn write_table(&self) -> Result<RwLockWriteGuard<'_, AccountTable>> {
        self.table.write().map_err(|_| ClientError::LockPoisoned)
    }

    /// 加入帳戶；已註冊者同時登記到金鑰表。回傳帳戶索引。
    pub fn add_account(&self, account: Account, activate: bool) -> Result<usize> {
        let mut table = self.write_table()?;
        if account.is_registered() {
            table.keys.insert(account.id.clone(), account.signer.clone());
        }
        table.accounts.push(account);
        let index = table.accounts.len() - 1;
        if activate {
            table.active = Some(index);
        }
        Ok(index)
    }

    pub fn set_active_account(&self, index: usize) -> Result<()> {
        let mut table = self.write_table()?;
        if index >= table.accounts.len() {
            return Err(ClientError::InvalidAccountIndex(index));
        }
        table.active = Some(index);
        Ok(())
    }

    /// 目前使用中帳戶的快照。
    pub fn active_account(&self) -> Result<Option<Account>> {
        Ok(self.read_table()?.active().cloned())
    }

    pub fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.read_table()?.accounts.clone())
    }

    pub fn add_key(&self, name: impl Into<String>, key: Arc<KeyPair>) -> Result<()> {
        self.write_table()?.keys.insert(name.into(), key);
        Ok(())
    }

    pub fn key(&self, name: &str) -> Result<Option<Arc<KeyPair>>> {
        Ok(self.read_table()?.keys.get(name).cloned())
    }

    /// 已註冊的使用中帳戶 (ID, 簽名金鑰)。
    fn active_identity(&self) -> Result<(String, Arc<KeyPair>)> {
        let table = self.read_table()?;
        let active = table.active().ok_or(ClientError::NoActiveAccount)?;
        if !active.is_registered() {
            return Err(ClientError::AccountNotCreated);
        }
        Ok((active.id.clone(), active.signer.clone()))
    }

    /// 以使用中帳戶與會話 nonce 補齊未指定的簽名選項。
    fn fill_defaults(&self, mut options: SignOptions) -> Result<SignOptions> {
        if options.nonce_source.is_none() {
            options.nonce_source = Some(self.nonce.clone() as Arc<dyn NonceSource>);
        }
        let needs_signer = options.signer.is_none();
        let needs_kid =
            !options.embed_key && options.key_id.as_deref().map_or(true, str::is_empty);
        if needs_signer || needs_kid {
            let table = self.read_table()?;
            if let Some(active) = table.active() {
                if needs_signer {
                    options.signer = Some(active.signer.clone());
                }
                if needs_kid && active.is_registered() {
                    options.key_id = Some(active.id.clone());
                }
            }
        }
        Ok(options)
    }

    /// 對 `url` 與 `payload` 簽名，未指定的選項由會話補齊。
    pub fn sign(&self, url: &str, payload: &[u8], options: SignOptions) -> Result<SignedJws> {
        let options = self.fill_defaults(options)?;
        Ok(jws::sign(url, payload, &options)?)
    }

    /// 簽名並 POST，回應的 `Replay-Nonce` 會回饋給 nonce 管理器。
    ///
    /// 不檢查狀態碼。
    pub fn post(&self, url: &str, payload: &[u8], options: SignOptions) -> Result<HttpResponse> {
        let options = self.fill_defaults(options)?;
        self.post_signed(url, payload, &options)
    }

    /// 以已完整的選項簽名並送出，不讀取帳戶表。
    fn post_signed(&self, url: &str, payload: &[u8], options: &SignOptions) -> Result<HttpResponse> {
        let signed = jws::sign(url, payload, options)?;
        debug!(url, nonce = ?signed.parsed.header.nonce, "POST signed request");
        let response = self.transport.post(url, JOSE_JSON, signed.serialized)?;
        self.nonce.absorb(&response)?;
        Ok(response)
    }

    /// 匿名 GET，同樣吸收回應中的 nonce。
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self.transport.get(url)?;
        self.nonce.absorb(&response)?;
        Ok(response)
    }

    /// 以空載荷的 POST-as-GET 讀取資源。
    pub fn post_as_get(&self, url: &str) -> Result<HttpResponse> {
        self.post(url, b"", SignOptions::default())
    }

    /// 依設定以 POST-as-GET 或匿名 GET 讀取資源，要求 200。
    pub fn fetch(&self, url: &str) -> Result<HttpResponse> {
        let response = if self.config.post_as_get {
            self.post_as_get(url)?
        } else {
            self.get(url)?
        };
        expect_status(response, StatusCode::OK)
    }

    /// 註冊新帳戶：嵌入公鑰簽名，要求 201 與 `Location`。
    ///
    /// 已有 ID 的帳戶直接失敗，不發出任何請求。
    pub fn create_account(&self, account: &mut Account) -> Result<()> {
        if account.is_registered() {
            return Err(ClientError::AccountAlreadyCreated(account.id.clone()));
        }
        let url = self.endpoint(endpoints::NEW_ACCOUNT)?;
        let contact = if account.contact.is_empty() {
            self.config.contact.clone()
        } else {
            account.contact.clone()
        };
        let payload = NewAccountPayload::new(&contact);
        let bytes = payload.to_bytes()?;
        let options = SignOptions::embedded().with_signer(account.signer.clone());

        let response = expect_status(self.post(&url, &bytes, options)?, StatusCode::CREATED)?;
        let location = response
            .location()
            .ok_or(ClientError::MissingLocationHeader)?;

        account.id = location.to_string();
        account.contact = payload.contact().to_vec();
        info!(id = %account.id, "created ACME account");
        Ok(())
    }

    /// 以新的聯絡方式更新使用中帳戶，回傳更新後的快照。
    pub fn update_account<S: AsRef<str>>(&self, contacts: &[S]) -> Result<Account> {
        let (id, _) = self.active_identity()?;
        let payload = UpdateAccountPayload::new(contacts);
        let bytes = payload.to_bytes()?;
        expect_status(self.post(&id, &bytes, SignOptions::default())?, StatusCode::OK)?;

        let mut table = self.write_table()?;
        let account = table.active_mut().ok_or(ClientError::NoActiveAccount)?;
        account.contact = payload.contact().to_vec();
        Ok(account.clone())
    }

    /// 停用使用中帳戶。伺服器之後會拒絕此帳戶的所有請求。
    pub fn deactivate_account(&self) -> Result<()> {
        let (id, _) = self.active_identity()?;
        let payload = DeactivatePayload::default().to_bytes()?;
        expect_status(self.post(&id, &payload, SignOptions::default())?, StatusCode::OK)?;
        warn!(id = %id, "deactivated ACME account");
        Ok(())
    }

    /// 建立訂單：要求使用中帳戶已註冊，回應 201 後記錄訂單 URL 到帳戶，再以主體取代訂單。
    ///
    /// 主體無法解析時回傳錯誤，`order` 保持原狀。
    pub fn create_order(&self, order: &mut Order) -> Result<()> {
        let (account_id, _) = self.active_identity()?;
        let url = self.endpoint(endpoints::NEW_ORDER)?;
        let payload = NewOrderPayload::new(order.identifiers.clone()).to_bytes()?;

        let response = expect_status(
            self.post(&url, &payload, SignOptions::key_id(account_id.clone()))?,
            StatusCode::CREATED,
        )?;
        let location = response
            .location()
            .ok_or(ClientError::MissingLocationHeader)?
            .to_string();

        // 伺服器已建立訂單；即使主體無法解析，URL 也要先記錄到帳戶
        {
            let mut table = self.write_table()?;
            if let Some(account) = table.accounts.iter_mut().find(|a| a.id == account_id) {
                account.orders.push(location.clone());
            }
        }
        *order = Order::from_response(location.clone(), &response.body)?;
        info!(order = %location, identifiers = order.identifiers.len(), "created order");
        Ok(())
    }

    /// 重新抓取資源並整個取代。
    pub fn update<R: Resource>(&self, resource: &mut R) -> Result<()> {
        if resource.id().is_empty() {
            return Err(ClientError::MissingUrl("resource"));
        }
        let response = self.fetch(resource.id())?;
        resource.replace_from(&response.body)?;
        Ok(())
    }

    pub fn update_order(&self, order: &mut Order) -> Result<()> {
        self.update(order)
    }

    pub fn update_authz(&self, authz: &mut Authorization) -> Result<()> {
        self.update(authz)
    }

    pub fn update_challenge(&self, challenge: &mut Challenge) -> Result<()> {
        self.update(challenge)
    }

    /// 依序抓取訂單的全部授權。
    pub fn fetch_authorizations(&self, order: &Order) -> Result<Vec<Authorization>> {
        order
            .authorizations
            .iter()
            .map(|url| {
                let response = self.fetch(url)?;
                Ok(Authorization::from_response(url.as_str(), &response.body)?)
            })
            .collect()
    }

    /// 通知伺服器開始驗證挑戰（POST `{}`），並以回應取代挑戰。
    pub fn respond_challenge(&self, challenge: &mut Challenge) -> Result<()> {
        if challenge.url.is_empty() {
            return Err(ClientError::MissingUrl("challenge"));
        }
        let payload = ChallengeValidationPayload::new().to_bytes()?;
        let response = expect_status(
            self.post(&challenge.url, &payload, SignOptions::default())?,
            StatusCode::OK,
        )?;
        challenge.replace_from(&response.body)?;
        debug!(url = %challenge.url, status = challenge.status.as_str(), "responded to challenge");
        Ok(())
    }

    pub fn deactivate_authz(&self, authz: &mut Authorization) -> Result<()> {
        if authz.id.is_empty() {
            return Err(ClientError::MissingUrl("authorization"));
        }
        let payload = DeactivatePayload::default().to_bytes()?;
        let response = expect_status(
            self.post(&authz.id, &payload, SignOptions::default())?,
            StatusCode::OK,
        )?;
        authz.replace_from(&response.body)?;
        Ok(())
    }

    /// 以訂單識別項產生 CSR 並送往 `finalize`；不輪詢。
    ///
    /// 未提供憑證金鑰時產生新的 P-256 金鑰。回傳實際使用的金鑰。
    pub fn finalize(&self, order: &mut Order, cert_key: Option<Arc<KeyPair>>) -> Result<Arc<KeyPair>> {
        if order.finalize.is_empty() {
            return Err(ClientError::MissingUrl("finalize"));
        }
        let cert_key = match cert_key {
            Some(key) => key,
            None => Arc::new(KeyPair::generate(KeyAlgorithm::EcdsaP256)?),
        };
        let csr = CSR::from_identifiers(&order.identifiers)?.build_der(&cert_key)?;
        let payload = FinalizeOrderPayload::new(&csr).to_bytes()?;

        let finalize_url = order.finalize.clone();
        let response = expect_status(
            self.post(&finalize_url, &payload, SignOptions::default())?,
            StatusCode::OK,
        )?;
        order.replace_from(&response.body)?;
        info!(order = %order.id, status = %order.status, "submitted finalize request");
        Ok(cert_key)
    }

    /// 下載有效訂單的憑證鏈。
    pub fn download_certificate(&self, order: &Order) -> Result<Certificate> {
        if order.status != OrderStatus::Valid {
            return Err(ClientError::OrderNotValid);
        }
        let url = order.certificate.as_deref().ok_or(ClientError::OrderNotValid)?;
        let response = self.fetch(url)?;
        Ok(Certificate::from_pem(&response.text())?)
    }

    /// 金鑰輪替。
    ///
    /// 內層 JWS 以新金鑰嵌入公鑰簽名，載荷為帳戶 URL 與舊公鑰；外層以舊金鑰 Key-ID 模式簽名，
    /// 載荷為內層 JWS。內層不帶 nonce，只有外層取一個。整個過程持有帳戶表寫鎖，伺服器回 200 後
    /// 金鑰表與帳戶簽名者在同一把鎖下一起換成新金鑰。
    pub fn rollover(&self, new_signer: Arc<KeyPair>) -> Result<()> {
        let url = self.endpoint(endpoints::KEY_CHANGE)?;
        let mut table = self.write_table()?;
        let index = table.active.ok_or(ClientError::NoActiveAccount)?;
        let (account_id, old_signer) = {
            let active = table.active().ok_or(ClientError::NoActiveAccount)?;
            if !active.is_registered() {
                return Err(ClientError::AccountNotCreated);
            }
            (active.id.clone(), active.signer.clone())
        };
        let inner_payload = KeyChangePayload::new(account_id.clone(), old_signer.jwk()?).to_bytes()?;
        let inner = jws::sign_inner(&url, &inner_payload, &new_signer)?;

        let outer = SignOptions::key_id(account_id.clone())
            .with_signer(old_signer)
            .with_nonce_source(self.nonce.clone() as Arc<dyn NonceSource>);
        expect_status(
            self.post_signed(&url, &inner.serialized, &outer)?,
            StatusCode::OK,
        )?;

        table.keys.insert(account_id.clone(), new_signer.clone());
        if let Some(account) = table.accounts.get_mut(index) {
            account.signer = new_signer;
        }
        info!(id = %account_id, "rolled over account key");
        Ok(())
    }

    /// 撤銷憑證。
    ///
    /// 提供 `cert_key` 時以該金鑰嵌入公鑰簽名（不需帳戶），否則以使用中帳戶 Key-ID 簽名。
    pub fn revoke_certificate(
        &self,
        cert_der: &[u8],
        reason: Option<u8>,
        cert_key: Option<Arc<KeyPair>>,
    ) -> Result<()> {
        let url = self.endpoint(endpoints::REVOKE_CERT)?;
        let payload = RevokeCertPayload::new(cert_der, reason).to_bytes()?;
        let options = match cert_key {
            Some(key) => SignOptions::embedded().with_signer(key),
            None => SignOptions::default(),
        };
        expect_status(self.post(&url, &payload, options)?, StatusCode::OK)?;
        info!(reason = ?reason, "revoked certificate");
        Ok(())
    }

    /// 輪詢 `url` 的 `status` 欄位直到等於 `target`。
    ///
    /// `policy` 為 `None` 時使用設定中的預設值。用盡次數不是錯誤，由 [`PollOutcome`] 回報。
    pub fn poll_until(
        &self,
        url: &str,
        target: &str,
        policy: Option<PollPolicy>,
        cancel: Option<&CancelToken>,
    ) -> Result<PollOutcome> {
        let policy = policy.unwrap_or(self.config.poll);
        poll::poll_until(&policy, target, cancel, || {
            let status: StatusOnly = self.fetch(url)?.json()?;
            Ok(status.status)
        })
    }

    /// 與 [`Client::poll_until`] 相同，但每次都以回應取代 `resource`。
    pub fn poll_resource<R: Resource>(
        &self,
        resource: &mut R,
        target: &str,
        policy: Option<PollPolicy>,
        cancel: Option<&CancelToken>,
    ) -> Result<PollOutcome> {
        let policy = policy.unwrap_or(self.config.poll);
        poll::poll_until(&policy, target, cancel, || {
            self.update(resource)?;
            Ok(resource.status_str().to_string())
        })
    }

    /// 使用中帳戶對 `token` 的 key authorization。
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        let table = self.read_table()?;
        let active = table.active().ok_or(ClientError::NoActiveAccount)?;
        Ok(challenge::key_authorization(
            token,
            &active.signer.thumbprint()?,
        ))
    }

    /// 透過回應端佈署挑戰，回傳使用的 key authorization。
    pub fn provision_challenge(
        &self,
        responder: &dyn ChallengeResponder,
        authz: &Authorization,
        challenge: &Challenge,
    ) -> Result<String> {
        let key_auth = self.key_authorization(&challenge.token)?;
        match &challenge.challenge_type {
            ChallengeType::Http01 => responder.add_http_one_challenge(&challenge.token, &key_auth)?,
            ChallengeType::Dns01 => responder.add_dns_one_challenge(authz.host(), &key_auth)?,
            ChallengeType::TlsAlpn01 => responder.add_tls_alpn_challenge(authz.host(), &key_auth)?,
            other => return Err(ResponderError::Unsupported(other.clone()).into()),
        }
        debug!(challenge_type = %challenge.challenge_type, host = authz.host(), "provisioned challenge");
        Ok(key_auth)
    }

    /// 移除 [`Client::provision_challenge`] 佈署的內容。
    pub fn cleanup_challenge(
        &self,
        responder: &dyn ChallengeResponder,
        authz: &Authorization,
        challenge: &Challenge,
    ) -> Result<()> {
        match &challenge.challenge_type {
            ChallengeType::Http01 => responder.delete_http_one_challenge(&challenge.token)?,
            ChallengeType::Dns01 => responder.delete_dns_one_challenge(authz.host())?,
            ChallengeType::TlsAlpn01 => responder.delete_tls_alpn_challenge(authz.host())?,
            other => return Err(ResponderError::Unsupported(other.clone()).into()),
        }
        Ok(())
    }
}

/// 狀態碼不符時附上問題文件與主體。
fn expect_status(response: HttpResponse, expected: StatusCode) -> Result<HttpResponse> {
    if response.status == expected {
        return Ok(response);
    }
    Err(ClientError::UnexpectedStatus {
        expected,
        status: response.status,
        problem: response.problem(),
        body: response.text(),
    })
}
