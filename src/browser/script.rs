//! Script bodies injected into the live page.
//!
//! Every script is written for `execute_async` semantics: the last argument
//! is the completion callback and the script resolves by calling it exactly
//! once. Results are plain JSON objects so the Rust side never has to parse
//! free-form strings.

/// Report where the page currently is
pub const PAGE_CONTEXT: &str = r#"
const done = arguments[arguments.length - 1];
done({
    href: window.location.href,
    hostname: window.location.hostname,
    pathname: window.location.pathname
});
"#;

/// Extract the addressing token (the build id embedded in the page's
/// serialized Next.js payload). Resolves `{ token: null }` when the page is
/// not fully loaded or not on the target site.
pub const EXTRACT_TOKEN: &str = r#"
const done = arguments[arguments.length - 1];
const el = document.getElementById('__NEXT_DATA__');
if (!el) {
    done({ token: null });
    return;
}
try {
    const data = JSON.parse(el.textContent);
    done({ token: data.buildId || null });
} catch (e) {
    done({ token: null });
}
"#;

/// Fallback lookup for the community's internal group id when the task's
/// params do not carry one. Checks the same embedded payload locations the
/// site itself populates.
pub const GROUP_ID_FALLBACK: &str = r#"
const done = arguments[arguments.length - 1];
const el = document.getElementById('__NEXT_DATA__');
if (!el) {
    done({ groupId: null });
    return;
}
try {
    const data = JSON.parse(el.textContent);
    const props = (data.props && data.props.pageProps) || {};
    const groupId = props.groupId
        || (props.group && props.group.id)
        || (data.query && data.query.groupId)
        || null;
    done({ groupId: groupId });
} catch (e) {
    done({ groupId: null });
}
"#;

/// Fetch a URL from inside the page, carrying the session's ambient
/// credentials. The body is returned as text; classification and JSON
/// parsing happen on the Rust side.
pub const FETCH_JSON: &str = r#"
const url = arguments[0];
const done = arguments[arguments.length - 1];
fetch(url, { credentials: 'include', headers: { 'Accept': 'application/json' } })
    .then(async (resp) => {
        const body = await resp.text();
        done({ ok: resp.ok, status: resp.status, statusText: resp.statusText, body: body });
    })
    .catch((err) => {
        done({ networkError: String((err && err.message) || err) });
    });
"#;
