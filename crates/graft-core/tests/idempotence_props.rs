use graft_core::{Integrator, ServiceSpec};
use graft_test_utils::{CountingGenerator, Project, SAMPLE_CADDYFILE, SAMPLE_COMPOSE};
use proptest::prelude::*;

fn profiles() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![Just("n8n".to_string()), Just("vault-n8n".to_string()), "[a-z]{1,6}"],
        0..5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_second_run_changes_nothing(
        domain in "[a-z]{1,8}\\.(com|org|lan)",
        existing in profiles(),
        quoted in any::<bool>(),
    ) {
        let mut unique: Vec<String> = Vec::new();
        for p in existing {
            if !unique.contains(&p) {
                unique.push(p);
            }
        }
        let list = unique.join(",");
        let list = if quoted { format!("\"{list}\"") } else { list };
        let env = format!("USER_DOMAIN_NAME={domain}\nCOMPOSE_PROFILES={list}\n");
        let project = Project::with_files(Some(&env), Some(SAMPLE_COMPOSE), Some(SAMPLE_CADDYFILE));

        let first = Integrator::new(ServiceSpec::vault_n8n(), project.paths.clone())
            .with_generator(CountingGenerator::new())
            .run()
            .unwrap();
        prop_assert_eq!(&first.hostname, &format!("vault-n8n.{domain}"));
        let after_first = project.snapshot();

        let second = Integrator::new(ServiceSpec::vault_n8n(), project.paths.clone())
            .with_generator(CountingGenerator::new())
            .run()
            .unwrap();
        prop_assert!(second.is_noop());
        prop_assert_eq!(project.snapshot(), after_first);

        let env = project.env();
        let profiles_line = env.lines().find(|l| l.starts_with("COMPOSE_PROFILES=")).unwrap();
        prop_assert_eq!(profiles_line.matches("vault-n8n").count(), 1);
        prop_assert_eq!(env.matches("VAULT_N8N_AUTH_TOKEN=").count(), 1);
    }
}
