//! Integrator
//!
//! Drives one run over the three stores:
//!
//! ```text
//! Start ──▶ EnvReady ──▶ TopologyReady ──▶ RouteReady ──▶ Done
//!   └──────────┴──────────────┴───────────────┴──▶ Failed
//! ```
//!
//! Every step checks for existence before it mutates, and every store is
//! saved atomically at the end of its own phase. There is no cross-store
//! rollback: after a failure the next run redoes only what is missing.

use graft_store::{
    is_hex_of_len, render, Ensured, KeyValueStore, OpenMode, OsSecretGenerator, Params,
    RouteDocument, SecretGenerator, StoreError, TemplateKind, TopologyDocument,
};

use crate::error::{IntegrationError, IntegrationResult, PhaseContext};
use crate::phase::{Phase, PhaseTracker};
use crate::report::{IntegrationReport, Outcome};
use crate::spec::{ServiceSpec, StorePaths, ValueSource, FALLBACK_BASE_DOMAIN};

const SERVICES: &str = "services";
const VOLUMES: &str = "volumes";

/// The three stores held for the duration of one run
#[derive(Debug)]
struct Stores {
    env: KeyValueStore,
    topology: TopologyDocument,
    routes: RouteDocument,
}

/// Integrates one [`ServiceSpec`] into an existing deployment
#[derive(Debug, Clone)]
pub struct Integrator<G = OsSecretGenerator> {
    spec: ServiceSpec,
    paths: StorePaths,
    generator: G,
    dry_run: bool,
}

impl Integrator<OsSecretGenerator> {
    /// Integrator using the OS random source
    #[must_use]
    pub fn new(spec: ServiceSpec, paths: StorePaths) -> Self {
        Self {
            spec,
            paths,
            generator: OsSecretGenerator::new(),
            dry_run: false,
        }
    }
}

impl<G: SecretGenerator> Integrator<G> {
    /// Replace the secret generator
    #[must_use]
    pub fn with_generator<H: SecretGenerator>(self, generator: H) -> Integrator<H> {
        Integrator {
            spec: self.spec,
            paths: self.paths,
            generator,
            dry_run: self.dry_run,
        }
    }

    /// Compute every change but write nothing
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Spec being integrated
    #[inline]
    #[must_use]
    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Store locations
    #[inline]
    #[must_use]
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Run all phases
    ///
    /// # Errors
    /// The first failure aborts the run. Stores saved by earlier phases stay
    /// saved; the failing store is left as it was before the run.
    pub fn run(&self) -> IntegrationResult<IntegrationReport> {
        self.spec.validate()?;
        tracing::info!(
            service = %self.spec.name,
            dry_run = self.dry_run,
            "starting integration"
        );

        let mut tracker = PhaseTracker::new();
        match self.run_phases(&mut tracker) {
            Ok(report) => {
                tracing::info!(
                    service = %self.spec.name,
                    created = report.created_count(),
                    generated = report.generated.len(),
                    committed = report.committed,
                    "integration completed"
                );
                Ok(report)
            }
            Err(e) => {
                let reached = tracker.fail();
                tracing::error!(
                    service = %self.spec.name,
                    reached = %reached,
                    kind = e.kind(),
                    error = %e,
                    "integration failed"
                );
                Err(e)
            }
        }
    }

    /// Report what a run would find, without generating or writing anything
    ///
    /// # Errors
    /// Store load or parse failures
    pub fn status(&self) -> IntegrationResult<IntegrationReport> {
        self.spec.validate()?;
        let stores = self.open()?;
        let spec = &self.spec;
        let mut report = IntegrationReport::new(&spec.name);

        let hostname_key = spec.hostname_key();
        report.hostname = stores
            .env
            .get(&hostname_key)
            .unwrap_or_else(|| self.derive_host(&stores.env));
        report.record(Phase::EnvReady, env_target(&hostname_key), presence(stores.env.has(&hostname_key)));

        for binding in &spec.env {
            if let ValueSource::Secret { key, .. } = &binding.source {
                report.record(Phase::EnvReady, env_target(key), presence(stores.env.has(key)));
            }
        }
        for member in &spec.activation {
            let present = stores
                .env
                .has_set_member(&member.key, &member.token)
                .in_phase(Phase::EnvReady)?;
            report.record(Phase::EnvReady, member_target(&member.key, &member.token), presence(present));
        }

        report.record(
            Phase::TopologyReady,
            block_target(SERVICES, &spec.name),
            presence(self.has_service(&stores.topology)),
        );
        report.record(
            Phase::TopologyReady,
            block_target(VOLUMES, &spec.volume.name),
            presence(stores.topology.has_named_block(VOLUMES, &spec.volume.name)),
        );

        let token = spec.host_token();
        report.record(Phase::RouteReady, route_target(&token), presence(stores.routes.has_route(&token)));

        Ok(report)
    }

    fn run_phases(&self, tracker: &mut PhaseTracker) -> IntegrationResult<IntegrationReport> {
        let mut report = IntegrationReport::new(&self.spec.name);

        let mut stores = self.open()?;

        self.ensure_env(&mut stores.env, &mut report)?;
        if !self.dry_run {
            stores.env.save().in_phase(Phase::EnvReady)?;
        }
        tracker.advance(Phase::EnvReady)?;

        self.ensure_topology(&mut stores.topology, &mut report)?;
        if !self.dry_run {
            stores.topology.save().in_phase(Phase::TopologyReady)?;
        }
        tracker.advance(Phase::TopologyReady)?;

        self.ensure_route(&mut stores.routes, &mut report)?;
        if !self.dry_run {
            stores.routes.save().in_phase(Phase::RouteReady)?;
        }
        tracker.advance(Phase::RouteReady)?;

        tracker.advance(Phase::Done)?;
        report.committed = !self.dry_run;
        Ok(report)
    }

    fn open(&self) -> IntegrationResult<Stores> {
        let env = KeyValueStore::load(&self.paths.env, OpenMode::CreateIfMissing).in_phase(Phase::Start)?;
        let topology = TopologyDocument::load(&self.paths.topology).in_phase(Phase::Start)?;
        let routes = RouteDocument::load(&self.paths.routes).in_phase(Phase::Start)?;
        Ok(Stores {
            env,
            topology,
            routes,
        })
    }

    /// `<name>.<base domain>`, falling back to `localhost`
    fn derive_host(&self, env: &KeyValueStore) -> String {
        let key = &self.spec.base_domain_key;
        let domain = env
            .get(key)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| {
                tracing::warn!(key = %key, fallback = FALLBACK_BASE_DOMAIN, "base domain not set");
                FALLBACK_BASE_DOMAIN.to_string()
            });
        format!("{}.{}", self.spec.name, domain)
    }

    fn ensure_env(
        &self,
        env: &mut KeyValueStore,
        report: &mut IntegrationReport,
    ) -> IntegrationResult<()> {
        let phase = Phase::EnvReady;
        env.begin_section(self.spec.label());

        let hostname_key = self.spec.hostname_key();
        // a stored host name wins; the base domain is only consulted without one
        let derived = (!env.has(&hostname_key)).then(|| self.derive_host(env));
        let ensured = env
            .ensure(&hostname_key, || Ok(derived.unwrap_or_default()))
            .in_phase(phase)?;
        report.hostname = ensured.value().to_string();
        note_ensured(report, &hostname_key, ensured);

        for binding in &self.spec.env {
            let ValueSource::Secret { key, bytes, strict } = &binding.source else {
                continue;
            };
            let ensured = env
                .ensure(key, || self.generator.generate(*bytes))
                .in_phase(phase)?;

            if *strict && !ensured.is_created() && !is_hex_of_len(ensured.value(), *bytes) {
                let line = env.line_of(key).unwrap_or_default();
                return Err(IntegrationError::store(
                    phase,
                    StoreError::malformed(
                        env.path(),
                        line,
                        key.as_str(),
                        format!("expected {} hex characters", bytes * 2),
                    ),
                ));
            }
            note_ensured(report, key, ensured);
        }

        for member in &self.spec.activation {
            let changed = env
                .ensure_set_member(&member.key, &member.token)
                .in_phase(phase)?;
            report.record(
                phase,
                member_target(&member.key, &member.token),
                if changed { Outcome::Created } else { Outcome::AlreadyPresent },
            );
        }
        Ok(())
    }

    fn ensure_topology(
        &self,
        topology: &mut TopologyDocument,
        report: &mut IntegrationReport,
    ) -> IntegrationResult<()> {
        let phase = Phase::TopologyReady;
        let spec = &self.spec;

        let service_target = block_target(SERVICES, &spec.name);
        if self.has_service(topology) {
            tracing::debug!(item = %service_target, "service block already present");
            report.record(phase, service_target, Outcome::AlreadyPresent);
        } else {
            let block = compact(&render(TemplateKind::Service, &self.service_params())?);
            topology.insert_block(SERVICES, &block).in_phase(phase)?;
            report.record(phase, service_target, Outcome::Created);
        }

        let volume_target = block_target(VOLUMES, &spec.volume.name);
        if topology.has_named_block(VOLUMES, &spec.volume.name) {
            tracing::debug!(item = %volume_target, "volume block already present");
            report.record(phase, volume_target, Outcome::AlreadyPresent);
        } else {
            let params = Params::new().with("volume", spec.volume.name.as_str());
            let block = render(TemplateKind::Volume, &params)?;
            topology.insert_block(VOLUMES, &block).in_phase(phase)?;
            report.record(phase, volume_target, Outcome::Created);
        }
        Ok(())
    }

    fn ensure_route(
        &self,
        routes: &mut RouteDocument,
        report: &mut IntegrationReport,
    ) -> IntegrationResult<()> {
        let token = self.spec.host_token();
        let target = route_target(&token);
        if routes.has_route(&token) {
            tracing::debug!(item = %target, "route already present");
            report.record(Phase::RouteReady, target, Outcome::AlreadyPresent);
            return Ok(());
        }
        routes.append_route(&token, &self.route_directive()?, self.spec.label());
        report.record(Phase::RouteReady, target, Outcome::Created);
        Ok(())
    }

    fn has_service(&self, topology: &TopologyDocument) -> bool {
        topology.has_named_block(SERVICES, &self.spec.name)
            || topology.has_named_block(SERVICES, self.spec.container_name())
    }

    fn service_params(&self) -> Params {
        let spec = &self.spec;
        Params::new()
            .with("name", spec.name.as_str())
            .with("image", spec.image.as_str())
            .with("container_name", spec.container_name())
            .with("profile", spec.name.as_str())
            .with("port", spec.port.to_string())
            .with("volume", spec.volume.name.as_str())
            .with("mount", spec.volume.mount.as_str())
            .with("environment", self.environment_lines())
    }

    /// `environment:` list at template indentation; deferred references are
    /// emitted as `${KEY}` and left for compose to resolve
    fn environment_lines(&self) -> String {
        if self.spec.env.is_empty() {
            return String::new();
        }
        let hostname_key = self.spec.hostname_key();
        let mut lines = vec!["  environment:".to_string()];
        for binding in &self.spec.env {
            let value = match &binding.source {
                ValueSource::Secret { key, .. } => format!("${{{key}}}"),
                ValueSource::Hostname => format!("${{{hostname_key}}}"),
                ValueSource::Literal { value } => value.clone(),
            };
            lines.push(format!("    - {}={value}", binding.var));
        }
        lines.join("\n")
    }

    fn route_directive(&self) -> IntegrationResult<String> {
        let params = Params::new()
            .with("upstream", self.spec.container_name())
            .with("port", self.spec.port.to_string());
        Ok(render(TemplateKind::RouteDirective, &params)?)
    }
}

fn note_ensured(report: &mut IntegrationReport, key: &str, ensured: Ensured) {
    match ensured {
        Ensured::Created(value) => {
            report.record(Phase::EnvReady, env_target(key), Outcome::Created);
            report.add_generated(key, value);
        }
        Ensured::Existing(_) => {
            report.record(Phase::EnvReady, env_target(key), Outcome::AlreadyPresent);
        }
    }
}

/// Drop blank lines left by empty optional placeholders
fn compact(block: &str) -> String {
    block
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| format!("{l}\n"))
        .collect()
}

fn presence(present: bool) -> Outcome {
    if present {
        Outcome::AlreadyPresent
    } else {
        Outcome::Missing
    }
}

fn env_target(key: &str) -> String {
    format!("env:{key}")
}

fn member_target(key: &str, token: &str) -> String {
    format!("env:{key} += {token}")
}

fn block_target(section: &str, name: &str) -> String {
    format!("{section}/{name}")
}

fn route_target(token: &str) -> String {
    format!("route {token}")
}
