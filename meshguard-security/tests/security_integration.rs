//! End-to-end exercise of the security kernel, token subsystem, audit log,
//! and violation monitor working together, the way `meshguard` wires them
//! up at startup.

use std::sync::Arc;
use std::time::Duration;

use meshguard_security::prelude::*;

fn audit() -> Arc<AuditLogger> {
    Arc::new(AuditLogger::new(AuditLoggerConfig::for_tests(), "audit-secret".into()))
}

#[tokio::test]
async fn capability_delegation_token_issuance_and_revocation_cascade() {
    let kernel = Arc::new(SecurityKernel::new(
        "signing-secret".into(),
        KernelPolicies::permissive(),
        audit(),
    ));

    let mut constraints = Constraints::new();
    constraints.operations = Some(["read".to_string(), "write".to_string()].into_iter().collect());
    constraints.paths = Some(vec!["/workspace".to_string()]);

    let root = kernel
        .request_capability(ResourceType::Filesystem, constraints, "orchestrator")
        .await
        .unwrap();

    let mut delegated_constraints = Constraints::new();
    delegated_constraints.operations = Some(["read".to_string()].into_iter().collect());
    let child = kernel
        .delegate_capability(&root.id, "sub-agent-1", delegated_constraints)
        .await
        .unwrap();
    assert_eq!(child.constraints.operations, Some(["read".to_string()].into_iter().collect()));

    let key_manager = Arc::new(KeyManager::new(Duration::from_secs(3600), Duration::from_secs(60)).unwrap());
    let revocation = Arc::new(RevocationCache::new(10_000));
    let issuer = TokenIssuer::new(key_manager.clone(), revocation.clone(), audit(), Duration::from_secs(300));
    let validator = TokenValidator::new(key_manager, revocation, Duration::from_secs(30), Duration::from_secs(30));

    let token = issuer.issue(&child, None).await.unwrap();
    let claims = validator.validate(&token).unwrap();
    assert!(validator.check_operation(&claims, "read", "/workspace/a.txt").is_ok());
    assert!(validator.check_operation(&claims, "write", "/workspace/a.txt").is_err());

    let cascaded = kernel.revoke_capability(&root.id).await.unwrap();
    assert_eq!(cascaded, 2);
    assert!(kernel.get(&child.id).unwrap().revoked);
}

#[tokio::test]
async fn repeated_permission_denials_are_observable_by_the_violation_monitor() {
    let kernel = SecurityKernel::new("secret".into(), KernelPolicies::permissive(), audit());
    let monitor = ViolationMonitor::new(Duration::from_secs(900)).with_threshold(
        ViolationType::PermissionDenied,
        meshguard_security::violation::ThresholdConfig {
            threshold: 5,
            window: Duration::from_secs(300),
            severity: Severity::Medium,
        },
    );

    let mut alerted = false;
    for _ in 0..5 {
        let result = kernel.check_permission("intruder", ResourceType::Filesystem, "read", "/etc/shadow");
        assert!(result.is_err());
        let record = ViolationRecord::new(
            ViolationType::PermissionDenied,
            "intruder",
            "/etc/shadow",
            "read",
            serde_json::json!({}),
        );
        if monitor
            .record(&record)
            .iter()
            .any(|a| a.violation_type == ViolationType::PermissionDenied)
        {
            alerted = true;
        }
    }
    assert!(alerted);
}
