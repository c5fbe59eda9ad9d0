mod common;

use aiosmtp::{SmtpAuthMethod, SmtpClient, SmtpCredentials, SmtpErrorKind, Timeout};
use common::{MockServer, Script, EHLO_REPLY, PASSWORD, TOKEN, USER};

async fn connected(server: &MockServer) -> SmtpClient {
    let mut client = SmtpClient::new(server.config());
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn login_prefers_cram_md5() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    client.login(USER, PASSWORD).await.unwrap();
    assert_eq!(server.commands_for("AUTH"), vec!["AUTH CRAM-MD5"]);
}

#[tokio::test]
async fn login_falls_back_when_mechanism_fails() {
    let server = MockServer::start(
        Script::new().reply("AUTH CRAM-MD5", "535 5.7.8 CRAM-MD5 is broken here"),
    )
    .await;
    let mut client = connected(&server).await;

    client.login(USER, PASSWORD).await.unwrap();
    let auth = server.commands_for("AUTH");
    assert_eq!(auth.len(), 2);
    assert_eq!(auth[0], "AUTH CRAM-MD5");
    assert!(auth[1].starts_with("AUTH PLAIN "));
}

#[tokio::test]
async fn garbled_cram_md5_challenge_is_cancelled() {
    let server = MockServer::start(Script::new().cram_challenge("%%not-base64%%")).await;
    let mut client = connected(&server).await;

    client.login(USER, PASSWORD).await.unwrap();
    let commands = server.commands();
    assert_eq!(commands[1], "AUTH CRAM-MD5");
    assert_eq!(commands[2], "*");
    assert!(commands[3].starts_with("AUTH PLAIN "));
    assert!(client.is_connected());
}

#[tokio::test]
async fn garbled_cram_md5_challenge_fails_forced_mechanism() {
    let server = MockServer::start(Script::new().cram_challenge("%%not-base64%%")).await;
    let mut client = connected(&server).await;

    let err = client
        .auth_crammd5(USER, PASSWORD, Timeout::Default)
        .await
        .unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::Authentication);
    client.noop(Timeout::Default).await.unwrap();
    assert_eq!(server.commands().last().map(String::as_str), Some("NOOP"));
}

#[tokio::test]
async fn login_uses_only_advertised_mechanisms() {
    let ehlo = EHLO_REPLY.replace("AUTH PLAIN LOGIN CRAM-MD5", "AUTH LOGIN");
    let server = MockServer::start(Script::new().ehlo(&ehlo)).await;
    let mut client = connected(&server).await;

    client.login(USER, PASSWORD).await.unwrap();
    let auth = server.commands_for("AUTH");
    assert_eq!(auth.len(), 1);
    assert!(auth[0].starts_with("AUTH LOGIN "));
}

#[tokio::test]
async fn wrong_password_reports_last_failure() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    let err = client.login(USER, "not-it").await.unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::Authentication);
    assert_eq!(err.code, Some(535));
    // Every mechanism was tried, strongest first.
    let mechanisms: Vec<String> = server
        .commands_for("AUTH")
        .iter()
        .filter_map(|c| c.split_whitespace().nth(1).map(str::to_string))
        .collect();
    assert_eq!(mechanisms, vec!["CRAM-MD5", "PLAIN", "LOGIN"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn server_without_auth() {
    let server = MockServer::start(
        Script::new().ehlo("250-mock.example.com Hello\r\n250 8BITMIME"),
    )
    .await;
    let mut client = connected(&server).await;

    let err = client.login(USER, PASSWORD).await.unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::NotSupported);
    assert_eq!(err.message, "SMTP AUTH extension not supported by server.");
}

#[tokio::test]
async fn no_usable_mechanism() {
    let server = MockServer::start(
        Script::new().ehlo("250-mock.example.com Hello\r\n250 AUTH XOAUTH2 GSSAPI"),
    )
    .await;
    let mut client = connected(&server).await;

    let err = client.login(USER, PASSWORD).await.unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::NotSupported);
    assert_eq!(err.message, "No suitable authentication method found.");
    assert!(server.commands_for("AUTH").is_empty());
}

#[tokio::test]
async fn explicit_mechanisms() {
    let server = MockServer::start(Script::new()).await;

    let mut client = connected(&server).await;
    client.auth_plain(USER, PASSWORD, Timeout::Default).await.unwrap();
    client.shutdown().await.unwrap();

    let mut client = connected(&server).await;
    client.auth_login(USER, PASSWORD, Timeout::Default).await.unwrap();
    client.shutdown().await.unwrap();

    let mut client = connected(&server).await;
    let err = client
        .auth_crammd5("mallory", PASSWORD, Timeout::Default)
        .await
        .unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::Authentication);
}

#[tokio::test]
async fn secrets_are_not_plain_text_on_the_wire() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    client.auth_login(USER, PASSWORD, Timeout::Default).await.unwrap();
    assert!(server.commands().iter().all(|c| !c.contains(PASSWORD)));
}

#[tokio::test]
async fn authenticate_with_forced_method() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    let creds = SmtpCredentials {
        method: Some(SmtpAuthMethod::Login),
        ..SmtpCredentials::new(USER, PASSWORD)
    };
    client.authenticate(&creds).await.unwrap();
    let auth = server.commands_for("AUTH");
    assert_eq!(auth.len(), 1);
    assert!(auth[0].starts_with("AUTH LOGIN"));
    // Greeting happened first.
    assert!(server.commands()[0].starts_with("EHLO"));
}

#[tokio::test]
async fn authenticate_with_oauth2_token() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    let creds = SmtpCredentials {
        oauth2_token: Some(TOKEN.into()),
        ..SmtpCredentials::new(USER, "")
    };
    client.authenticate(&creds).await.unwrap();
    assert!(server.commands_for("AUTH")[0].starts_with("AUTH XOAUTH2 "));
}

#[tokio::test]
async fn rejected_oauth2_token() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    let err = client
        .auth_xoauth2(USER, "expired", Timeout::Default)
        .await
        .unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::Authentication);
    assert_eq!(err.code, Some(535));
    // The challenge was answered with an empty line.
    assert_eq!(server.commands().last().map(String::as_str), Some(""));
}

#[tokio::test]
async fn oauth2_method_needs_token() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    let creds = SmtpCredentials {
        method: Some(SmtpAuthMethod::XOAuth2),
        ..SmtpCredentials::new(USER, PASSWORD)
    };
    let err = client.authenticate(&creds).await.unwrap_err();
    assert_eq!(err.kind, SmtpErrorKind::Config);
    assert!(server.commands_for("AUTH").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_mechanism_is_rejected() {
    let server = MockServer::start(Script::new()).await;
    let mut client = connected(&server).await;

    let reply = client
        .execute_command(&["AUTH", "NTLM"], Timeout::Default)
        .await
        .unwrap();
    assert_eq!(reply.code, 504);
    assert!(reply.is_permanent_negative());
}
