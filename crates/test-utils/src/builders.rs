#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use ferryman::config::model::{HopConfig, S3Endpoint, SourceConfig};
use ferryman::config::{
    ConfigFile, ConfigSection, EndpointConfig, EndpointKind, RawConfigFile, TemplateConfig,
};
use ferryman::types::{HumanDuration, TriggerKind};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                endpoint: BTreeMap::new(),
                template: Vec::new(),
            },
        }
    }

    pub fn with_local(mut self, name: &str, root: &str) -> Self {
        self.config
            .endpoint
            .insert(name.to_string(), EndpointConfig::local(root));
        self
    }

    /// An S3 endpoint that takes credentials from the engine's environment.
    pub fn with_bucket(mut self, name: &str, bucket: &str) -> Self {
        let kind = EndpointKind::S3(S3Endpoint {
            bucket: bucket.to_string(),
            region: None,
            endpoint_url: None,
            access_key_id: None,
            secret_key_env: None,
            env_auth: true,
        });
        self.config
            .endpoint
            .insert(name.to_string(), EndpointConfig::new(kind));
        self
    }

    pub fn with_endpoint(mut self, name: &str, endpoint: EndpointConfig) -> Self {
        self.config.endpoint.insert(name.to_string(), endpoint);
        self
    }

    /// Per-endpoint ceiling on running Jobs targeting `name`.
    pub fn endpoint_limit(mut self, name: &str, max: usize) -> Self {
        if let Some(ep) = self.config.endpoint.get_mut(name) {
            ep.max_concurrent_transfers = max;
        }
        self
    }

    pub fn with_template(mut self, template: TemplateConfig) -> Self {
        self.config.template.push(template);
        self
    }

    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.config.max_concurrent_jobs = max;
        self
    }

    pub fn retry(mut self, max_retries: u32, base: Duration, max: Duration) -> Self {
        self.config.config.retry.max_retries = max_retries;
        self.config.config.retry.base_delay = HumanDuration(base);
        self.config.config.retry.max_delay = HumanDuration(max);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TemplateConfig`.
pub struct TemplateConfigBuilder {
    template: TemplateConfig,
}

impl TemplateConfigBuilder {
    pub fn new(name: &str, trigger: TriggerKind) -> Self {
        Self {
            template: TemplateConfig {
                name: name.to_string(),
                trigger,
                schedule: None,
                source: SourceConfig {
                    endpoint: String::new(),
                    path: String::new(),
                    pattern: "*".to_string(),
                },
                destination: HopConfig {
                    endpoint: String::new(),
                    path: String::new(),
                },
                chain: Vec::new(),
                delete_source_after_transfer: false,
                active: true,
            },
        }
    }

    pub fn manual(name: &str) -> Self {
        Self::new(name, TriggerKind::Manual)
    }

    pub fn source(mut self, endpoint: &str, path: &str, pattern: &str) -> Self {
        self.template.source = SourceConfig {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
            pattern: pattern.to_string(),
        };
        self
    }

    pub fn destination(mut self, endpoint: &str, path: &str) -> Self {
        self.template.destination = HopConfig {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
        };
        self
    }

    pub fn hop(mut self, endpoint: &str, path: &str) -> Self {
        self.template.chain.push(HopConfig {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn every(mut self, schedule: &str) -> Self {
        self.template.schedule = Some(schedule.to_string());
        self
    }

    pub fn delete_source(mut self, val: bool) -> Self {
        self.template.delete_source_after_transfer = val;
        self
    }

    pub fn active(mut self, val: bool) -> Self {
        self.template.active = val;
        self
    }

    pub fn build(self) -> TemplateConfig {
        self.template
    }
}
