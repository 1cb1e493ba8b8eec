//! # ACME 協議引擎
//!
//! 本庫實作 ACME（RFC 8555）用戶端的協議核心，可供互動式工具或自動化程式共用：
//!
//! - **目錄與 nonce**：延遲抓取並快取目錄（[`directory`]），以 [`nonce::NonceManager`]
//!   管理防重放 nonce，每次取用後立即補充，並吸收所有回應中的 `Replay-Nonce`。
//! - **JWS**：嵌入公鑰或 Key-ID 兩種模式的 flattened JWS 簽名（[`jws`]），
//!   支援 ES256 與 RS256。
//! - **資源狀態機**：帳戶、訂單、授權與挑戰（[`account`]、[`order`]、[`authorization`]、
//!   [`challenge`]），每次抓取都以伺服器表示整個取代。
//! - **會話**：[`Client`] 串起上述元件，提供建立帳戶、下單、回應挑戰、finalize、
//!   下載與撤銷憑證、金鑰輪替以及輪詢。
//!
//! 挑戰的實際佈署（HTTP 檔案、DNS 記錄、TLS-ALPN 憑證）交由實作
//! [`challenge::ChallengeResponder`] 的外部協作者負責。
//!
//! ## 示例
//!
//! ```no_run
//! use acmeshell_core::{
//!     account::Account, config::directories, key_pair::KeyAlgorithm, order::Order,
//!     Client, ClientConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::new(directories::LETS_ENCRYPT_STAGING))?;
//!
//!     // 1. 註冊帳戶並設為使用中
//!     let mut account = Account::generate(vec!["admin@example.com".into()], KeyAlgorithm::EcdsaP256)?;
//!     client.create_account(&mut account)?;
//!     client.add_account(account, true)?;
//!
//!     // 2. 建立訂單並等待授權完成（挑戰佈署略）
//!     let mut order = Order::for_names(&["example.com"]);
//!     client.create_order(&mut order)?;
//!     client.poll_resource(&mut order, "ready", None, None)?;
//!
//!     // 3. finalize 並下載憑證
//!     let _cert_key = client.finalize(&mut order, None)?;
//!     client.poll_resource(&mut order, "valid", None, None)?;
//!     let certificate = client.download_certificate(&order)?;
//!     println!("{}", certificate.pem());
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod encoding;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod resource;
pub mod signature;
pub mod storage;
pub mod transport;

pub use client::{Client, ClientError};
pub use config::ClientConfig;
pub use resource::Resource;
