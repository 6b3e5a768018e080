//! Application info endpoint.
//!
//! Exposes `/info/v1` returning app name, version, cluster ID and task ID.

use serde::Serialize;
use warp::Filter;
use warp::filters::BoxedFilter;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppInfo {
    app: &'static str,
    version: &'static str,
    cluster_id: &'static str,
    task_id: &'static str,
}

/// Creates the `/info/v1` route returning application metadata as JSON.
pub fn get_info_route() -> BoxedFilter<(impl warp::Reply,)> {
    warp::path!("info" / "v1")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&AppInfo {
                app: crate::APP_NAME.as_str(),
                version: crate::APP_VERSION.as_str(),
                cluster_id: crate::CLUSTER_ID.as_str(),
                task_id: crate::TASK_ID.as_str(),
            })
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn info_reports_the_application() {
        let response = warp::test::request()
            .path("/info/v1")
            .reply(&get_info_route())
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["app"], crate::APP_NAME.as_str());
        assert!(body["clusterId"].is_string());
        assert!(body["taskId"].is_string());
    }
}
