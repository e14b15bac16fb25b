use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cmcs_license_sync::remote::{ClientConfig, Credentials, LicensePortal, Session};
use cmcs_license_sync::{ErrorKind, ToolError};

const LOGIN_FORM: &str = r#"<html><body>
<form action="/CMCS/Account/Login" method="post">
  <input name="__RequestVerificationToken" type="hidden" value="tok123" />
  <input id="UserName" name="UserName" type="text" />
</form></body></html>"#;

const DETAIL_PAGE: &str = r#"<html><head><script type="text/javascript">
require(["esri/map"],function(f){var n=1,i={Id:7,visible:!0,Geometry:{rings:[[[106.5,47.5],[106.6,47.6]]]}},e=new f(n);});
</script></head></html>"#;

/// One request as the stub portal received it.
#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Local HTTP server answering with a fixed routing function.
struct StubPortal {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubPortal {
    fn serve<F>(route: F) -> Self
    where
        F: Fn(&Recorded) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener bound");
        let address = listener.local_addr().expect("local address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let Some(request) = read_request(&stream) else {
                    continue;
                };
                let reply = route(&request);
                log.lock().expect("request log").push(request);
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.flush();
            }
        });

        Self {
            base_url: format!("http://{address}/CMCS"),
            requests,
        }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(5),
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("request log").clone()
    }

    fn last_to(&self, path: &str) -> Recorded {
        self.requests()
            .into_iter()
            .rev()
            .find(|request| request.path() == path)
            .expect("request recorded")
    }
}

fn read_request(stream: &TcpStream) -> Option<Recorded> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;

    Some(Recorded {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn reply(status: u16, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status} Stub\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ));
    out
}

fn credentials() -> Credentials {
    Credentials {
        username: "surveyor".to_string(),
        password: "s3cret".to_string(),
    }
}

/// Routes a portal that accepts the login and serves `count` as the count body.
fn portal_with_count(count: &'static str) -> StubPortal {
    StubPortal::serve(move |request| match (request.method.as_str(), request.path()) {
        ("GET", "/CMCS/Account/Login") => reply(200, &[], LOGIN_FORM),
        ("POST", "/CMCS/Account/Login") => reply(200, &[], "welcome"),
        ("GET", "/CMCS/License/IndexCount/2") => reply(200, &[], count),
        _ => reply(404, &[], "not found"),
    })
}

#[test]
fn login_page_without_token_is_an_authentication_error() {
    let portal = StubPortal::serve(|request| match request.path() {
        "/CMCS/Account/Login" => reply(200, &[], "<html><form></form></html>"),
        _ => reply(404, &[], ""),
    });

    let error = Session::authenticate(&portal.config(), &credentials())
        .expect_err("login without token rejected");

    assert_eq!(error.kind(), ErrorKind::Authentication);
    assert!(error.to_string().contains("__RequestVerificationToken"));
    assert!(portal.requests().iter().all(|request| request.method == "GET"));
}

#[test]
fn rejected_login_is_an_authentication_error() {
    let portal = StubPortal::serve(|request| match request.method.as_str() {
        "GET" => reply(200, &[], LOGIN_FORM),
        _ => reply(401, &[], "denied"),
    });

    let error = Session::authenticate(&portal.config(), &credentials())
        .expect_err("rejected login");

    assert!(matches!(error, ToolError::Authentication(_)));
    assert!(error.to_string().contains("401"));
}

#[test]
fn login_posts_credentials_with_token_and_culture_cookie() {
    let portal = portal_with_count("12");

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    let total = session.entity_count().expect("count read");

    assert_eq!(total, 12);
    let login = portal.requests()[1].clone();
    assert_eq!(login.method, "POST");
    assert!(login.body.contains("UserName=surveyor"));
    assert!(login.body.contains("Password=s3cret"));
    assert!(login.body.contains("__RequestVerificationToken=tok123"));
    assert!(login.header("cookie").is_some_and(|cookie| cookie.contains("_cmcsCulture=en-GB")));
    assert_eq!(login.header("x-requested-with"), Some("XMLHttpRequest"));

    let count = portal.last_to("/CMCS/License/IndexCount/2");
    assert!(count.target.starts_with("/CMCS/License/IndexCount/2?_="));
}

#[test]
fn garbage_count_body_is_a_transport_error() {
    let portal = portal_with_count("<html>maintenance</html>");

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    let error = session.entity_count().expect_err("count rejected");

    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(error.to_string().contains("maintenance"));
}

#[test]
fn cookies_from_login_redirect_are_replayed() {
    let portal = StubPortal::serve(|request| match (request.method.as_str(), request.path()) {
        ("GET", "/CMCS/Account/Login") => reply(
            200,
            &[("Set-Cookie", ".AspNetCore.Antiforgery=af1; path=/; httponly")],
            LOGIN_FORM,
        ),
        ("POST", "/CMCS/Account/Login") => reply(
            302,
            &[
                ("Location", "/CMCS/"),
                ("Set-Cookie", ".AspNetCore.Cookies=session42; path=/; httponly"),
            ],
            "",
        ),
        ("GET", "/CMCS/") => reply(200, &[], "home"),
        ("GET", "/CMCS/License/IndexCount/2") => reply(200, &[], "4321"),
        _ => reply(404, &[], ""),
    });

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    assert_eq!(session.entity_count().expect("count read"), 4321);

    let login = portal.last_to("/CMCS/Account/Login");
    assert!(login
        .header("cookie")
        .is_some_and(|cookie| cookie.contains(".AspNetCore.Antiforgery=af1")));

    let home = portal.last_to("/CMCS/");
    assert_eq!(home.method, "GET");
    assert!(home.body.is_empty());

    let count = portal.last_to("/CMCS/License/IndexCount/2");
    let cookie = count.header("cookie").expect("cookie header");
    assert!(cookie.contains(".AspNetCore.Cookies=session42"));
    assert!(cookie.contains("_cmcsCulture=en-GB"));
}

#[test]
fn expired_cookies_are_dropped() {
    let portal = StubPortal::serve(|request| match (request.method.as_str(), request.path()) {
        ("GET", "/CMCS/Account/Login") => reply(
            200,
            &[
                ("Set-Cookie", "tracker=t1; path=/"),
                ("Set-Cookie", "visit=v1; path=/"),
            ],
            LOGIN_FORM,
        ),
        ("POST", "/CMCS/Account/Login") => reply(
            200,
            &[
                ("Set-Cookie", "tracker=t1; expires=Thu, 01-Jan-1970 00:00:00 GMT; path=/"),
                ("Set-Cookie", "visit=v1; Max-Age=0"),
                ("Set-Cookie", "keep=k1; expires=Fri, 31 Dec 2100 23:59:59 GMT; path=/"),
            ],
            "welcome",
        ),
        ("GET", "/CMCS/License/IndexCount/2") => reply(200, &[], "1"),
        _ => reply(404, &[], ""),
    });

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    session.entity_count().expect("count read");

    let count = portal.last_to("/CMCS/License/IndexCount/2");
    let cookie = count.header("cookie").expect("cookie header");
    assert!(cookie.contains("keep=k1"));
    assert!(!cookie.contains("tracker="));
    assert!(!cookie.contains("visit="));
}

#[test]
fn listing_page_posts_grid_form_and_reads_untyped_rows() {
    let grid = r#"{"page":2,"total":3,"records":2001,"rows":[
        {"id":"11","cell":[11,"XV-000011","Uul","Mining","Valid",null,"1.5","XV-000011 Uul"]}
    ]}"#;
    let portal = StubPortal::serve(move |request| match (request.method.as_str(), request.path()) {
        ("GET", "/CMCS/Account/Login") => reply(200, &[], LOGIN_FORM),
        ("POST", "/CMCS/Account/Login") => reply(200, &[], "welcome"),
        ("POST", "/CMCS/License/GridData") => {
            reply(200, &[("Content-Type", "application/json")], grid)
        }
        _ => reply(404, &[], ""),
    });

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    let rows = session.listing_page(2).expect("page read");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text(0), "11");
    assert_eq!(rows[0].text(5), "");

    let form = portal.last_to("/CMCS/License/GridData").body;
    for field in [
        "indexType=2",
        "_search=false",
        "rows=1000",
        "page=2",
        "sidx=Id",
        "sord=desc",
    ] {
        assert!(form.contains(field), "missing {field} in {form}");
    }
    assert!(form.contains("nd="));
}

#[test]
fn failed_listing_page_is_a_transport_error() {
    let portal = StubPortal::serve(|request| match (request.method.as_str(), request.path()) {
        ("GET", "/CMCS/Account/Login") => reply(200, &[], LOGIN_FORM),
        ("POST", "/CMCS/Account/Login") => reply(200, &[], "welcome"),
        _ => reply(500, &[], "server error"),
    });

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    let error = session.listing_page(1).expect_err("page rejected");

    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(error.to_string().contains("500"));
}

#[test]
fn detail_page_is_posted_and_parsed() {
    let portal = StubPortal::serve(|request| match (request.method.as_str(), request.path()) {
        ("GET", "/CMCS/Account/Login") => reply(200, &[], LOGIN_FORM),
        ("POST", "/CMCS/Account/Login") => reply(200, &[], "welcome"),
        ("POST", "/CMCS/License/Details/7") => reply(200, &[], DETAIL_PAGE),
        _ => reply(404, &[], ""),
    });

    let mut session =
        Session::authenticate(&portal.config(), &credentials()).expect("logged in");
    let payload = session.entity_geometry(7).expect("geometry read");

    assert_eq!(payload.license_id, 7);
    assert_eq!(payload.ring, vec![(106.5, 47.5), (106.6, 47.6)]);
}

#[test]
fn unreachable_portal_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener bound");
    let address = listener.local_addr().expect("local address");
    drop(listener);

    let config = ClientConfig {
        base_url: format!("http://{address}/CMCS"),
        timeout: Duration::from_secs(2),
    };
    let error = Session::authenticate(&config, &credentials()).expect_err("no portal");

    assert_eq!(error.kind(), ErrorKind::Transport);
}
