//! Built-in API modules seeded into every engine.
//!
//! | module   | api               | dispatch |
//! |----------|-------------------|----------|
//! | `route`  | `navigateTo`      | main     |
//! | `route`  | `redirectTo`      | main     |
//! | `route`  | `navigateBack`    | main     |
//! | `route`  | `reLaunch`        | main     |
//! | `route`  | `getCurrentPages` | inline   |
//! | `system` | `getSystemInfo`   | inline   |
//! | `app`    | `exitMiniProgram` | main     |
//! | `app`    | `evaluateInPage`  | async    |

use async_trait::async_trait;
use pocket_protocol::{BridgeError, PageId};
use serde_json::{json, Value};

use crate::bridge::Responder;
use crate::registry::{ApiCall, ApiEntry, AsyncApiHandler, ModuleSpec};

pub fn builtin_modules() -> Vec<ModuleSpec> {
    vec![route_module(), system_module(), app_module()]
}

fn route_module() -> ModuleSpec {
    ModuleSpec::new("route")
        .api(
            "navigateTo",
            ApiEntry::immediate(|call| {
                let page = call.app()?.navigate_to(&call.param::<String>("url")?)?;
                Ok(Some(json!({ "pageId": page })))
            })
            .on_main(),
        )
        .api(
            "redirectTo",
            ApiEntry::immediate(|call| {
                let page = call.app()?.redirect_to(&call.param::<String>("url")?)?;
                Ok(Some(json!({ "pageId": page })))
            })
            .on_main(),
        )
        .api(
            "navigateBack",
            ApiEntry::immediate(|call| {
                let delta = call.opt_param::<usize>("delta")?.unwrap_or(1);
                let popped = call.app()?.navigate_back(delta)?;
                Ok(Some(json!({ "popped": popped })))
            })
            .on_main(),
        )
        .api(
            "reLaunch",
            ApiEntry::immediate(|call| {
                let page = call.app()?.re_launch(&call.param::<String>("url")?)?;
                Ok(Some(json!({ "pageId": page })))
            })
            .on_main(),
        )
        .api(
            "getCurrentPages",
            ApiEntry::immediate(|call| {
                let pages = call.app()?.current_pages();
                Ok(Some(serde_json::to_value(pages)?))
            }),
        )
}

/// Per-app answer of `getSystemInfo`, computed on first use.
struct SystemInfo(Value);

fn system_module() -> ModuleSpec {
    ModuleSpec::new("system").api(
        "getSystemInfo",
        ApiEntry::immediate(|call| {
            let app = call.app()?;
            let info = app.modules().get_or_init_with(|| {
                let mut info = app.context().config().system_info.clone();
                info.insert("appId".into(), json!(app.identity().app_id));
                info.insert("env".into(), json!(app.identity().env));
                info.insert("instanceId".into(), json!(app.instance_id()));
                SystemInfo(Value::Object(info))
            });
            Ok(Some(info.0.clone()))
        }),
    )
}

struct EvaluateInPage;

#[async_trait]
impl AsyncApiHandler for EvaluateInPage {
    async fn call(&self, call: ApiCall) -> Result<Option<Value>, BridgeError> {
        let app = call.app()?;
        let script: String = call.param("script")?;
        let page = match call.opt_param::<PageId>("pageId")? {
            Some(page) => page,
            None => app.active_page().ok_or_else(|| BridgeError::missing("pageId"))?.page_id,
        };
        Ok(Some(app.evaluate_in_page(page, script).await?))
    }
}

fn app_module() -> ModuleSpec {
    ModuleSpec::new("app")
        .api(
            "exitMiniProgram",
            ApiEntry::new(|call: ApiCall, responder: Responder| -> Result<(), BridgeError> {
                let app = call.app()?;
                responder.success(None);
                app.exit();
                Ok(())
            })
            .on_main(),
        )
        .api("evaluateInPage", ApiEntry::asynchronous(EvaluateInPage))
}
