mod common;

use std::time::Duration;

use catalog_harvest::error::CatalogError;
use catalog_harvest::session::Session;
use catalog_harvest::traits::PageSource;
use common::{Reply, TestServer};

const LOGIN_PAGE: &str = r#"<!doctype html>
<html><body>
  <form action="/login/submit" method="post">
    <input type="hidden" name="csrf" value="t0k">
    <input type="email" name="customer[email]">
    <input type="password" name="customer[password]">
    <button type="submit">Sign in</button>
  </form>
</body></html>"#;

fn shop() -> TestServer {
    TestServer::spawn(|req| match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/login") => Reply::html(LOGIN_PAGE).header("Set-Cookie", "pre=1; Path=/"),
        ("POST", "/login/submit") => {
            let ok = req.has_cookie("pre=1")
                && req.body.contains("csrf=t0k")
                && req.body.contains("customer%5Bemail%5D=me%40example.com")
                && req.body.contains("customer%5Bpassword%5D=hunter2");
            if ok {
                Reply::redirect(302, "/account").header("Set-Cookie", "sid=ok; Path=/; HttpOnly")
            } else {
                Reply::redirect(302, "/login")
            }
        }
        ("GET", "/account") if req.has_cookie("sid=ok") => {
            Reply::html(r#"<a href="/account/logout">Log out</a>"#)
        }
        ("GET", "/account") => Reply::html(r#"<a href="/login">Sign in</a>"#),
        ("GET", "/old") => Reply::redirect(301, "/middle").header("Set-Cookie", "hop1=a"),
        ("GET", "/middle") => Reply::redirect(302, "/new").header("Set-Cookie", "hop2=b"),
        ("GET", "/new") => Reply::html("<p>arrived</p>"),
        ("GET", "/loop") => Reply::redirect(302, "/loop"),
        _ => Reply::status(404),
    })
}

fn session(server: &TestServer) -> Session {
    Session::new(server.origin(), "catalog-harvest-test", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn login_discovers_the_form_and_captures_the_session_cookie() {
    let server = shop();
    let session = session(&server);

    assert!(!session.is_logged_in().await);
    assert!(session.login("me@example.com", "hunter2").await);

    let jar = session.cookies();
    assert_eq!(jar.get("pre"), Some("1"));
    assert_eq!(jar.get("sid"), Some("ok"));
    assert!(session.is_logged_in().await);

    let paths = server.paths();
    assert!(paths.contains(&"GET /account/login".to_string()));
    assert!(paths.contains(&"POST /login/submit".to_string()));
}

#[tokio::test]
async fn wrong_credentials_fail_every_candidate() {
    let server = shop();
    let session = session(&server);

    assert!(!session.login("me@example.com", "wrong").await);
    assert_eq!(session.cookies().get("sid"), None);
}

#[tokio::test]
async fn cookie_string_skips_login() {
    let server = shop();
    let session = session(&server).with_cookie_string("sid=ok; theme=dark");

    assert!(session.is_logged_in().await);
    assert_eq!(session.cookies().len(), 2);
}

#[tokio::test]
async fn redirects_are_followed_and_every_hop_sets_cookies() {
    let server = shop();
    let session = session(&server);

    let body = session.fetch_html(&server.url("/old")).await.unwrap();
    assert!(body.contains("arrived"));
    let jar = session.cookies();
    assert_eq!(jar.get("hop1"), Some("a"));
    assert_eq!(jar.get("hop2"), Some("b"));
}

#[tokio::test]
async fn error_statuses_and_redirect_loops_are_errors() {
    let server = shop();
    let session = session(&server);

    let missing = session.fetch_html(&server.url("/nope")).await.unwrap_err();
    assert!(matches!(missing, CatalogError::Status { status: 404, .. }));

    let looping = session.fetch_html(&server.url("/loop")).await.unwrap_err();
    assert!(matches!(looping, CatalogError::Fetch { .. }));
}
