use std::{sync::Arc, time::Duration};

use acmeshell_core::{
    account::Account,
    challenge::{ChallengeType, MemResponder},
    jws::Jws,
    key_pair::{KeyAlgorithm, KeyPair},
    order::{Order, OrderStatus},
    poll::{PollOutcome, PollPolicy},
    transport::{HttpResponse, MockTransport},
    Client, ClientConfig, Resource,
};
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::BigNum,
    hash::MessageDigest,
    x509::{X509NameBuilder, X509},
};
use reqwest::Method;
use serde_json::{json, Value};

const DIR: &str = "https://ca/dir";
const NONCE: &str = "https://ca/nonce";

fn client_with(mock: &Arc<MockTransport>, directory: Value) -> Client {
    mock.push(Method::GET, DIR, HttpResponse::new(200).with_json(&directory));
    let config = ClientConfig::new(DIR).with_poll(PollPolicy::new(3, Duration::from_millis(1)));
    Client::with_transport(config, mock.clone()).unwrap()
}

fn push_nonces(mock: &MockTransport, prefix: &str, count: usize) {
    for i in 0..count {
        mock.push(
            Method::HEAD,
            NONCE,
            HttpResponse::new(204).with_header("Replay-Nonce", &format!("{prefix}-{i}")),
        );
    }
}

fn leaf_pem(cn: &str) -> String {
    let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&Asn1Integer::from_bn(&BigNum::from_u32(7).unwrap()).unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key.private_key()).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(90).unwrap()).unwrap();
    builder.sign(key.private_key(), MessageDigest::sha256()).unwrap();
    String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}

#[test]
fn test_refresh_then_create_account() {
    let mock = Arc::new(MockTransport::new());
    let client = client_with(
        &mock,
        json!({"newNonce": NONCE, "newAccount": "https://ca/acct"}),
    );
    mock.push(
        Method::HEAD,
        NONCE,
        HttpResponse::new(200).with_header("Replay-Nonce", "aaa"),
    );
    push_nonces(&mock, "next", 1);
    mock.push(
        Method::POST,
        "https://ca/acct",
        HttpResponse::new(201)
            .with_header("Location", "https://ca/acct/1")
            .with_json(&json!({"status": "valid", "contact": ["mailto:test@example.com"]})),
    );

    client.refresh_nonce().unwrap();
    assert_eq!(client.nonce().current().unwrap().as_deref(), Some("aaa"));

    let mut account = Account::generate(
        vec!["mailto:test@example.com".to_string()],
        KeyAlgorithm::EcdsaP256,
    )
    .unwrap();
    client.create_account(&mut account).unwrap();
    assert_eq!(account.id, "https://ca/acct/1");

    let post = mock
        .requests()
        .into_iter()
        .find(|r| r.method == Method::POST)
        .unwrap();
    assert_eq!(post.content_type.as_deref(), Some("application/jose+json"));
    let jws = Jws::parse(&post.body).unwrap();
    assert_eq!(jws.header.nonce.as_deref(), Some("aaa"));
    assert_eq!(jws.header.url, "https://ca/acct");
    assert_eq!(jws.header.jwk, Some(account.signer.jwk().unwrap()));
    assert!(jws.header.kid.is_none());
    assert_eq!(
        jws.payload_json::<Value>().unwrap(),
        json!({"contact": ["mailto:test@example.com"], "termsOfServiceAgreed": true})
    );
    assert_eq!(client.nonce().current().unwrap().as_deref(), Some("next-0"));
}

#[test]
fn test_issuance_flow() {
    let mock = Arc::new(MockTransport::new());
    let client = client_with(
        &mock,
        json!({
            "newNonce": NONCE,
            "newAccount": "https://ca/acct",
            "newOrder": "https://ca/new-order"
        }),
    );
    push_nonces(&mock, "n", 10);

    let order_body = |status: &str, certificate: Option<&str>| {
        let mut body = json!({
            "status": status,
            "identifiers": [{"type": "dns", "value": "example.com"}],
            "authorizations": ["https://ca/authz/1"],
            "finalize": "https://ca/order/1/finalize"
        });
        if let Some(url) = certificate {
            body["certificate"] = json!(url);
        }
        body
    };
    let authz_body = |status: &str, challenge_status: &str| {
        json!({
            "status": status,
            "identifier": {"type": "dns", "value": "example.com"},
            "challenges": [{
                "type": "http-01",
                "url": "https://ca/chall/1",
                "token": "tok-1",
                "status": challenge_status
            }]
        })
    };

    mock.push(
        Method::POST,
        "https://ca/acct",
        HttpResponse::new(201).with_header("Location", "https://ca/acct/1"),
    )
    .push(
        Method::POST,
        "https://ca/new-order",
        HttpResponse::new(201)
            .with_header("Location", "https://ca/order/1")
            .with_json(&order_body("pending", None)),
    )
    .push(
        Method::POST,
        "https://ca/authz/1",
        HttpResponse::new(200).with_json(&authz_body("pending", "pending")),
    )
    .push(
        Method::POST,
        "https://ca/chall/1",
        HttpResponse::new(200).with_json(&json!({
            "type": "http-01", "url": "https://ca/chall/1", "token": "tok-1", "status": "processing"
        })),
    )
    .push(
        Method::POST,
        "https://ca/authz/1",
        HttpResponse::new(200).with_json(&authz_body("valid", "valid")),
    )
    .push(
        Method::POST,
        "https://ca/order/1/finalize",
        HttpResponse::new(200).with_json(&order_body("processing", None)),
    )
    .push(
        Method::POST,
        "https://ca/order/1",
        HttpResponse::new(200).with_json(&order_body("valid", Some("https://ca/cert/1"))),
    )
    .push(
        Method::POST,
        "https://ca/cert/1",
        HttpResponse::new(200)
            .with_header("Content-Type", "application/pem-certificate-chain")
            .with_body(leaf_pem("example.com")),
    );

    let mut account = Account::generate(vec!["admin@example.com".into()], KeyAlgorithm::EcdsaP256)
        .unwrap();
    client.create_account(&mut account).unwrap();
    client.add_account(account.clone(), true).unwrap();

    let mut order = Order::for_names(&["example.com"]);
    client.create_order(&mut order).unwrap();
    assert_eq!(order.id(), "https://ca/order/1");
    assert_eq!(order.status, OrderStatus::Pending);

    let mut authzs = client.fetch_authorizations(&order).unwrap();
    assert_eq!(authzs.len(), 1);
    let authz = &mut authzs[0];
    assert_eq!(authz.id, "https://ca/authz/1");

    let responder = MemResponder::new();
    let mut challenge = authz.challenge(&ChallengeType::Http01).unwrap().clone();
    let key_auth = client
        .provision_challenge(&responder, authz, &challenge)
        .unwrap();
    assert_eq!(
        responder.get(&ChallengeType::Http01, "tok-1"),
        Some(key_auth.clone())
    );
    assert_eq!(
        key_auth,
        format!("tok-1.{}", account.signer.thumbprint().unwrap())
    );

    client.respond_challenge(&mut challenge).unwrap();
    assert_eq!(challenge.status.as_str(), "processing");

    let outcome = client.poll_resource(authz, "valid", None, None).unwrap();
    assert_eq!(outcome, PollOutcome::Matched { attempts: 1 });
    client.cleanup_challenge(&responder, authz, &challenge).unwrap();
    assert!(responder.is_empty());

    client.finalize(&mut order, None).unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    assert!(client
        .poll_resource(&mut order, "valid", None, None)
        .unwrap()
        .is_matched());
    assert_eq!(order.certificate.as_deref(), Some("https://ca/cert/1"));

    let certificate = client.download_certificate(&order).unwrap();
    assert_eq!(certificate.chain().len(), 1);

    // 所有已簽名請求的 nonce 互不相同
    let nonces: Vec<String> = mock
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::POST)
        .filter_map(|r| Jws::parse(&r.body).unwrap().header.nonce)
        .collect();
    assert_eq!(nonces.len(), 8);
    let mut unique = nonces.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), nonces.len());

    let active = client.active_account().unwrap().unwrap();
    assert_eq!(active.orders, vec!["https://ca/order/1"]);
}
