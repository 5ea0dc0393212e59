//! 沙箱服务 - 业务能力层
//!
//! 只负责"创建沙箱 / 上传文件 / 检查运行状态 / 释放沙箱"能力，不关心流程
//!
//! ## 沙箱网关接口
//!
//! `HttpSandboxProvider` 对接一个 REST 风格的沙箱网关：
//!
//! | 操作 | 请求 |
//! |---|---|
//! | 创建 | `POST {api}/sandbox` |
//! | 上传文件 | `PUT {api}/sandbox/{id}/files?path=...` |
//! | 执行命令 | `POST {api}/sandbox/{id}/exec` |
//! | 预览地址 | `GET {api}/sandbox/{id}/ports/{port}/preview-url` |
//! | 删除 | `DELETE {api}/sandbox/{id}` |

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DeploymentError;
use crate::models::{GeneratedFile, SandboxHandle};
use crate::services::build_log::detect_build_failure;
use crate::services::template_loader::load_template_files;
use crate::utils::logging::truncate_text;

/// 沙箱运行状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthReport {
    Healthy,
    /// 编译或运行出错，`file` 为出错文件（如果能识别）
    Failing { file: Option<String>, error: String },
}

/// 沙箱能力
///
/// `release` 必须是幂等的：释放不存在或已释放的沙箱返回 `Ok(())`
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// 创建沙箱并启动开发服务器
    async fn provision(&self) -> Result<SandboxHandle, DeploymentError>;

    /// 上传单个文件，开发服务器会热更新
    async fn upload(&self, handle: &SandboxHandle, file: &GeneratedFile)
        -> Result<(), DeploymentError>;

    /// 预览地址
    async fn preview_url(&self, handle: &SandboxHandle) -> Result<String, DeploymentError>;

    /// 检查编译 / 运行状态
    async fn check(&self, handle: &SandboxHandle) -> Result<HealthReport, DeploymentError>;

    async fn release(&self, handle: &SandboxHandle) -> Result<(), DeploymentError>;
}

const PROJECT_DIR: &str = "project";
const DEV_LOG: &str = "/tmp/next.log";
const POLL_INTERVAL: Duration = Duration::from_secs(4);
/// 上传后等待热更新编译
const COMPILE_SETTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    image: &'a str,
    language: &'a str,
    public: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecResponse {
    exit_code: i32,
    #[serde(default)]
    result: String,
}

#[derive(Debug, Deserialize)]
struct PreviewResponse {
    url: String,
}

/// 基于 HTTP 网关的沙箱服务
pub struct HttpSandboxProvider {
    client: Client,
    api_url: String,
    api_key: String,
    port: u16,
    readiness_poll_attempts: u32,
    template_files: Vec<GeneratedFile>,
}

impl HttpSandboxProvider {
    /// 创建沙箱服务并加载项目模板
    pub async fn new(config: &Config) -> Result<Self, DeploymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| DeploymentError::Sandbox {
                message: e.to_string(),
            })?;

        let template_files = load_template_files(Path::new(&config.sandbox_template_dir)).await;

        Ok(Self {
            client,
            api_url: config.sandbox_api_url.trim_end_matches('/').to_string(),
            api_key: config.sandbox_api_key.clone(),
            port: config.sandbox_port,
            readiness_poll_attempts: config.readiness_poll_attempts,
            template_files,
        })
    }

    fn sandbox_url(&self, handle: &SandboxHandle, suffix: &str) -> String {
        format!("{}/sandbox/{}{}", self.api_url, handle.id, suffix)
    }

    /// 在沙箱中执行命令
    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout_secs: u64,
    ) -> Result<ExecResponse, DeploymentError> {
        debug!("沙箱 {} 执行: {}", handle.id, truncate_text(command, 80));
        let response = self
            .client
            .post(self.sandbox_url(handle, "/exec"))
            .bearer_auth(&self.api_key)
            .json(&ExecRequest {
                command,
                timeout: timeout_secs,
            })
            .send()
            .await
            .map_err(sandbox_error)?
            .error_for_status()
            .map_err(sandbox_error)?;

        response.json().await.map_err(sandbox_error)
    }

    async fn upload_raw(
        &self,
        handle: &SandboxHandle,
        path: &str,
        content: &str,
    ) -> Result<(), DeploymentError> {
        let full_path = format!("{}/{}", PROJECT_DIR, path);
        self.client
            .put(self.sandbox_url(handle, "/files"))
            .bearer_auth(&self.api_key)
            .query(&[("path", full_path.as_str())])
            .body(content.to_string())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeploymentError::Upload {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// 轮询开发服务器是否已经可以响应
    async fn wait_until_ready(&self, handle: &SandboxHandle) -> bool {
        let probe = format!(
            "node -e \"require('http').get('http://localhost:{}',(r)=>{{process.stdout.write(String(r.statusCode));process.exit(0)}}).on('error',()=>{{process.stdout.write('fail');process.exit(1)}})\"",
            self.port
        );

        for attempt in 1..=self.readiness_poll_attempts {
            match self.exec(handle, &probe, 10).await {
                Ok(result) => {
                    let status = result.result.trim();
                    debug!("沙箱 {} 第 {} 次探测: '{}'", handle.id, attempt, status);
                    if status.contains("200") || status.contains("304") {
                        info!("✓ 沙箱 {} 开发服务器就绪 (第 {} 次探测)", handle.id, attempt);
                        return true;
                    }
                }
                Err(e) => debug!("沙箱 {} 第 {} 次探测失败: {}", handle.id, attempt, e),
            }
            sleep(POLL_INTERVAL).await;
        }

        warn!("⚠️ 沙箱 {} 开发服务器未能按时就绪", handle.id);
        false
    }

    /// 上传模板、安装依赖、启动开发服务器
    async fn prepare(&self, handle: &SandboxHandle) -> Result<(), DeploymentError> {
        for file in &self.template_files {
            self.upload_raw(handle, &file.path, &file.content).await?;
        }
        info!("✓ 已上传 {} 个模板文件", self.template_files.len());

        let install = self
            .exec(
                handle,
                &format!("cd {} && npm install --prefer-offline", PROJECT_DIR),
                120,
            )
            .await?;
        if install.exit_code != 0 {
            warn!(
                "⚠️ npm install 退出码 {}: {}",
                install.exit_code,
                truncate_text(&install.result, 500)
            );
        }

        // 后台进程，超时是预期行为
        let start = format!(
            "cd {} && nohup npx next dev -p {} > {} 2>&1 & disown",
            PROJECT_DIR, self.port, DEV_LOG
        );
        if let Err(e) = self.exec(handle, &start, 10).await {
            debug!("启动开发服务器返回: {}", e);
        }

        Ok(())
    }

    async fn read_dev_log(&self, handle: &SandboxHandle) -> String {
        match self
            .exec(handle, &format!("tail -50 {}", DEV_LOG), 5)
            .await
        {
            Ok(result) => result.result,
            Err(e) => {
                warn!("读取沙箱 {} 日志失败: {}", handle.id, e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn provision(&self) -> Result<SandboxHandle, DeploymentError> {
        info!("📦 正在创建沙箱...");
        let created: CreateSandboxResponse = self
            .client
            .post(format!("{}/sandbox", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&CreateSandboxRequest {
                image: "node:20-slim",
                language: "typescript",
                public: true,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(provision_error)?
            .json()
            .await
            .map_err(provision_error)?;

        let handle = SandboxHandle::new(created.id);
        info!("✓ 沙箱已创建: {}", handle.id);

        // 准备失败时沙箱还没有交给调用方，这里自己释放
        if let Err(e) = self.prepare(&handle).await {
            if let Err(release_err) = self.release(&handle).await {
                warn!("⚠️ 释放准备失败的沙箱 {} 出错: {}", handle.id, release_err);
            }
            return Err(e);
        }

        Ok(handle)
    }

    async fn upload(
        &self,
        handle: &SandboxHandle,
        file: &GeneratedFile,
    ) -> Result<(), DeploymentError> {
        self.upload_raw(handle, &file.path, &file.content).await?;
        debug!("已上传 {} 到沙箱 {}", file.path, handle.id);
        Ok(())
    }

    async fn preview_url(&self, handle: &SandboxHandle) -> Result<String, DeploymentError> {
        let preview: PreviewResponse = self
            .client
            .get(self.sandbox_url(handle, &format!("/ports/{}/preview-url", self.port)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(sandbox_error)?
            .json()
            .await
            .map_err(sandbox_error)?;
        Ok(preview.url)
    }

    async fn check(&self, handle: &SandboxHandle) -> Result<HealthReport, DeploymentError> {
        sleep(COMPILE_SETTLE).await;

        let ready = self.wait_until_ready(handle).await;
        let log = self.read_dev_log(handle).await;

        if let Some(failure) = detect_build_failure(&log) {
            return Ok(HealthReport::Failing {
                file: failure.file,
                error: failure.error,
            });
        }

        if !ready {
            return Ok(HealthReport::Failing {
                file: None,
                error: format!(
                    "开发服务器没有响应\n{}",
                    truncate_text(&log, 1000)
                ),
            });
        }

        Ok(HealthReport::Healthy)
    }

    async fn release(&self, handle: &SandboxHandle) -> Result<(), DeploymentError> {
        let response = self
            .client
            .delete(self.sandbox_url(handle, ""))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(sandbox_error)?;

        // 已经不存在的沙箱视为释放成功
        if response.status() == StatusCode::NOT_FOUND {
            debug!("沙箱 {} 已不存在", handle.id);
            return Ok(());
        }
        response.error_for_status().map_err(sandbox_error)?;
        info!("🗑️ 沙箱 {} 已释放", handle.id);
        Ok(())
    }
}

fn sandbox_error(err: reqwest::Error) -> DeploymentError {
    DeploymentError::Sandbox {
        message: err.to_string(),
    }
}

fn provision_error(err: reqwest::Error) -> DeploymentError {
    DeploymentError::Provision {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_response_shape() {
        let parsed: ExecResponse =
            serde_json::from_str(r#"{"exitCode": 0, "result": "200"}"#).unwrap();
        assert_eq!(parsed.exit_code, 0);
        assert_eq!(parsed.result, "200");

        let no_result: ExecResponse = serde_json::from_str(r#"{"exitCode": 1}"#).unwrap();
        assert!(no_result.result.is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_urls() {
        let config = Config {
            sandbox_api_url: "https://sandbox.test/api/".to_string(),
            sandbox_template_dir: "/definitely/not/here".to_string(),
            ..Config::default()
        };
        let provider = HttpSandboxProvider::new(&config).await.unwrap();
        let handle = SandboxHandle::new("sb-1");
        assert_eq!(
            provider.sandbox_url(&handle, "/exec"),
            "https://sandbox.test/api/sandbox/sb-1/exec"
        );
        assert!(provider.template_files.is_empty());
    }
}
