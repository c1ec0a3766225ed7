use std::sync::Arc;

use gatehouse::test_support::{TestFixtures, memory_manager};
use gatehouse::{AuthError, NewAccount, Role};

const PASSWORD: &str = "Sup3r!secret";
const WRONG_PASSWORD: &str = "Wr0ng!secret";

fn new_account(username: &str, email: &str) -> NewAccount {
    NewAccount {
        username: username.to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        first_name: None,
        last_name: None,
        phone: None,
    }
}

#[tokio::test]
async fn register_returns_a_working_session() {
    let (manager, _store) = memory_manager().expect("manager");

    let session = manager
        .register(new_account("alice", "alice@example.com"), Some("10.0.0.1"))
        .await
        .expect("registration");

    assert_eq!(session.account.username, "alice");
    assert_eq!(session.account.email, "alice@example.com");
    assert_eq!(session.account.roles, vec![Role::User]);
    assert!(session.refresh_token_expires_at > session.access_token_expires_at);

    let claims = manager
        .validate_access_token(&session.access_token)
        .expect("fresh access token validates");
    assert_eq!(claims.sub, session.account.id.to_string());
    assert_eq!(claims.username, "alice");
    assert_eq!(claims.email, "alice@example.com");
    assert_eq!(claims.roles, vec!["user".to_string()]);
}

#[tokio::test]
async fn register_accepts_profile_fields() {
    let (manager, _store) = memory_manager().expect("manager");

    let account = NewAccount {
        username: "bob".to_string(),
        email: "bob@example.com".to_string(),
        password: PASSWORD.to_string(),
        first_name: Some("Bob".to_string()),
        last_name: Some("Ferris".to_string()),
        phone: Some("+15551234567".to_string()),
    };
    let session = manager.register(account, None).await.expect("registration");
    assert_eq!(session.account.first_name.as_deref(), Some("Bob"));
    assert_eq!(session.account.last_name.as_deref(), Some("Ferris"));
}

#[tokio::test]
async fn register_rejects_malformed_input() {
    let (manager, _store) = memory_manager().expect("manager");

    let cases = [
        new_account("ab", "ab@example.com"),
        new_account("has spaces", "spaces@example.com"),
        new_account("carol", "not-an-email"),
        NewAccount {
            password: "short".to_string(),
            ..new_account("carol", "carol@example.com")
        },
        NewAccount {
            password: "alllowercase1!".to_string(),
            ..new_account("carol", "carol@example.com")
        },
        NewAccount {
            password: "NoDigitsHere!".to_string(),
            ..new_account("carol", "carol@example.com")
        },
        NewAccount {
            password: "NoSymbol123".to_string(),
            ..new_account("carol", "carol@example.com")
        },
        NewAccount {
            first_name: Some("X".to_string()),
            ..new_account("carol", "carol@example.com")
        },
        NewAccount {
            phone: Some("not-a-phone".to_string()),
            ..new_account("carol", "carol@example.com")
        },
    ];

    for account in cases {
        let err = manager
            .register(account, None)
            .await
            .expect_err("malformed input is rejected");
        assert!(matches!(err, AuthError::InvalidInput(_)), "got {err:?}");
    }
}

#[tokio::test]
async fn register_reports_which_field_conflicts() {
    let (manager, _store) = memory_manager().expect("manager");

    manager
        .register(new_account("dora", "dora@example.com"), None)
        .await
        .expect("first registration");

    let err = manager
        .register(new_account("dora", "second@example.com"), None)
        .await
        .expect_err("duplicate username");
    assert!(matches!(err, AuthError::Conflict("username")));

    let err = manager
        .register(new_account("dora2", "dora@example.com"), None)
        .await
        .expect_err("duplicate email");
    assert!(matches!(err, AuthError::Conflict("email")));
}

#[tokio::test]
async fn email_comparison_ignores_case_and_surrounding_space() {
    let (manager, _store) = memory_manager().expect("manager");

    manager
        .register(new_account("erik", "Erik@Example.COM"), None)
        .await
        .expect("registration");

    let err = manager
        .register(new_account("erik2", "  erik@example.com  "), None)
        .await
        .expect_err("same address modulo case");
    assert!(matches!(err, AuthError::Conflict("email")));
}

#[tokio::test]
async fn login_issues_a_fresh_session_and_stamps_last_login() {
    let (manager, _store) = memory_manager().expect("manager");

    let registered = manager
        .register(new_account("fay", "fay@example.com"), None)
        .await
        .expect("registration");
    assert_eq!(registered.account.last_login_at, None);

    let session = manager
        .login("  fay  ", PASSWORD, Some("10.0.0.2"))
        .await
        .expect("login");
    assert!(session.account.last_login_at.is_some());
    assert_ne!(session.refresh_token, registered.refresh_token);
}

#[tokio::test]
async fn login_failure_modes_are_indistinguishable() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("gil", "gil@example.com"), None)
        .await
        .expect("registration");

    // Unknown account, wrong password, and deactivated account all read the
    // same to the caller.
    let err = manager.login("nobody", PASSWORD, None).await.expect_err("unknown");
    assert!(matches!(err, AuthError::InvalidCredentials));

    let err = manager.login("gil", WRONG_PASSWORD, None).await.expect_err("wrong password");
    assert!(matches!(err, AuthError::InvalidCredentials));

    fixtures.deactivate(session.account.id);
    let err = manager.login("gil", PASSWORD, None).await.expect_err("deactivated");
    assert!(matches!(err, AuthError::InvalidCredentials));

    let err = manager.login("", PASSWORD, None).await.expect_err("blank username");
    assert!(matches!(err, AuthError::InvalidCredentials));
}

#[tokio::test]
async fn five_failures_lock_the_account() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("hana", "hana@example.com"), None)
        .await
        .expect("registration");

    for attempt in 1..=4 {
        let err = manager.login("hana", WRONG_PASSWORD, None).await.expect_err("failure");
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(fixtures.failed_logins(session.account.id), Some(attempt));
    }

    let err = manager.login("hana", WRONG_PASSWORD, None).await.expect_err("fifth failure");
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(fixtures.failed_logins(session.account.id), Some(5));

    // The correct password no longer helps while the lock holds.
    let err = manager.login("hana", PASSWORD, None).await.expect_err("locked");
    assert!(matches!(err, AuthError::AccountLocked));
}

#[tokio::test]
async fn attempts_against_a_locked_account_leave_the_counter_alone() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("iris", "iris@example.com"), None)
        .await
        .expect("registration");

    for _ in 0..5 {
        let _ = manager.login("iris", WRONG_PASSWORD, None).await;
    }
    assert_eq!(fixtures.failed_logins(session.account.id), Some(5));

    for _ in 0..3 {
        let err = manager.login("iris", WRONG_PASSWORD, None).await.expect_err("locked");
        assert!(matches!(err, AuthError::AccountLocked));
    }
    assert_eq!(fixtures.failed_logins(session.account.id), Some(5));
}

#[tokio::test]
async fn lock_expiry_restores_login_and_resets_the_counter() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("jane", "jane@example.com"), None)
        .await
        .expect("registration");

    for _ in 0..5 {
        let _ = manager.login("jane", WRONG_PASSWORD, None).await;
    }
    fixtures.expire_lockout(session.account.id);

    manager
        .login("jane", PASSWORD, None)
        .await
        .expect("login after the lock lapses");
    assert_eq!(fixtures.failed_logins(session.account.id), Some(0));
}

#[tokio::test]
async fn failure_after_a_lapsed_lock_relocks_immediately() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("kory", "kory@example.com"), None)
        .await
        .expect("registration");

    for _ in 0..5 {
        let _ = manager.login("kory", WRONG_PASSWORD, None).await;
    }
    fixtures.expire_lockout(session.account.id);

    // The counter is still at the threshold, so one more failure re-arms
    // the lock.
    let err = manager.login("kory", WRONG_PASSWORD, None).await.expect_err("sixth failure");
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(fixtures.failed_logins(session.account.id), Some(6));

    let err = manager.login("kory", PASSWORD, None).await.expect_err("relocked");
    assert!(matches!(err, AuthError::AccountLocked));
}

#[tokio::test]
async fn refresh_rotates_and_stale_values_cannot_be_replayed() {
    let (manager, _store) = memory_manager().expect("manager");

    let session = manager
        .register(new_account("lena", "lena@example.com"), Some("10.0.0.3"))
        .await
        .expect("registration");

    let renewed = manager
        .refresh(&session.refresh_token, Some("10.0.0.4"))
        .await
        .expect("rotation");
    assert_eq!(renewed.account.id, session.account.id);
    assert_ne!(renewed.refresh_token, session.refresh_token);

    let err = manager
        .refresh(&session.refresh_token, None)
        .await
        .expect_err("replay of the rotated value");
    assert!(matches!(err, AuthError::TokenRevoked));

    // The replacement from the winning rotation still works.
    manager
        .refresh(&renewed.refresh_token, None)
        .await
        .expect("second rotation");
}

#[tokio::test]
async fn refresh_rejects_unknown_and_expired_tokens() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("milo", "milo@example.com"), None)
        .await
        .expect("registration");

    let err = manager
        .refresh("no-such-token", None)
        .await
        .expect_err("unknown token");
    assert!(matches!(err, AuthError::InvalidToken));

    fixtures.expire_refresh_token(&session.refresh_token);
    let err = manager
        .refresh(&session.refresh_token, None)
        .await
        .expect_err("expired token");
    assert!(matches!(err, AuthError::TokenExpired));
}

#[tokio::test]
async fn concurrent_rotation_has_exactly_one_winner() {
    let (manager, _store) = memory_manager().expect("manager");

    let session = manager
        .register(new_account("nina", "nina@example.com"), None)
        .await
        .expect("registration");

    let manager = Arc::new(manager);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let token = session.refresh_token.clone();
        handles.push(tokio::spawn(
            async move { manager.refresh(&token, None).await },
        ));
    }

    let mut winners = 0;
    let mut replays = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(_) => winners += 1,
            Err(AuthError::TokenRevoked) => replays += 1,
            Err(other) => panic!("unexpected refresh outcome: {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(replays, 7);
}

#[tokio::test]
async fn revoke_marks_a_token_inert() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("olga", "olga@example.com"), None)
        .await
        .expect("registration");

    manager
        .revoke(&session.refresh_token, Some("10.0.0.5"))
        .await
        .expect("revocation");

    let err = manager
        .refresh(&session.refresh_token, None)
        .await
        .expect_err("revoked token cannot rotate");
    assert!(matches!(err, AuthError::TokenRevoked));

    let err = manager
        .revoke(&session.refresh_token, None)
        .await
        .expect_err("second revocation");
    assert!(matches!(err, AuthError::TokenRevoked));

    let err = manager.revoke("no-such-token", None).await.expect_err("unknown");
    assert!(matches!(err, AuthError::InvalidToken));

    let expired = manager.login("olga", PASSWORD, None).await.expect("login");
    fixtures.expire_refresh_token(&expired.refresh_token);
    let err = manager
        .revoke(&expired.refresh_token, None)
        .await
        .expect_err("expired token");
    assert!(matches!(err, AuthError::TokenExpired));
}

#[tokio::test]
async fn revoke_all_covers_every_live_session_and_is_idempotent() {
    let (manager, _store) = memory_manager().expect("manager");

    let first = manager
        .register(new_account("pete", "pete@example.com"), None)
        .await
        .expect("registration");
    let second = manager.login("pete", PASSWORD, None).await.expect("login");
    let third = manager.login("pete", PASSWORD, None).await.expect("login");

    let revoked = manager
        .revoke_all(first.account.id, Some("10.0.0.6"))
        .await
        .expect("revoke all");
    assert_eq!(revoked, 3);

    for token in [
        &first.refresh_token,
        &second.refresh_token,
        &third.refresh_token,
    ] {
        let err = manager.refresh(token, None).await.expect_err("revoked");
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    let revoked_again = manager
        .revoke_all(first.account.id, None)
        .await
        .expect("second revoke all");
    assert_eq!(revoked_again, 0);
}

#[tokio::test]
async fn password_reset_flow_replaces_the_credential() {
    let (manager, _store) = memory_manager().expect("manager");

    let session = manager
        .register(new_account("ruth", "ruth@example.com"), None)
        .await
        .expect("registration");

    let issued = manager
        .start_password_reset("ruth@example.com")
        .await
        .expect("reset token");

    manager
        .reset_password("ruth@example.com", &issued.token, "N3w!password", Some("10.0.0.7"))
        .await
        .expect("reset");

    let err = manager.login("ruth", PASSWORD, None).await.expect_err("old password");
    assert!(matches!(err, AuthError::InvalidCredentials));
    manager
        .login("ruth", "N3w!password", None)
        .await
        .expect("new password");

    // The reset cascaded over the session that predated it.
    let err = manager
        .refresh(&session.refresh_token, None)
        .await
        .expect_err("pre-reset session");
    assert!(matches!(err, AuthError::TokenRevoked));

    // Consumed tokens are single-use.
    let err = manager
        .reset_password("ruth@example.com", &issued.token, "An0ther!pw", None)
        .await
        .expect_err("reuse");
    assert!(matches!(err, AuthError::InvalidToken));
}

#[tokio::test]
async fn password_reset_rejects_bad_tokens_and_unknown_emails() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let err = manager
        .start_password_reset("ghost@example.com")
        .await
        .expect_err("unknown email");
    assert!(matches!(err, AuthError::NotFound));

    let session = manager
        .register(new_account("sven", "sven@example.com"), None)
        .await
        .expect("registration");
    let issued = manager
        .start_password_reset("sven@example.com")
        .await
        .expect("reset token");

    let err = manager
        .reset_password("sven@example.com", "wrong-token", "N3w!password", None)
        .await
        .expect_err("mismatched token");
    assert!(matches!(err, AuthError::InvalidToken));

    let err = manager
        .reset_password("ghost@example.com", &issued.token, "N3w!password", None)
        .await
        .expect_err("unknown email reads as a bad token");
    assert!(matches!(err, AuthError::InvalidToken));

    let err = manager
        .reset_password("sven@example.com", &issued.token, "weak", None)
        .await
        .expect_err("weak replacement password");
    assert!(matches!(err, AuthError::InvalidInput(_)));

    fixtures.expire_reset_token(session.account.id);
    let err = manager
        .reset_password("sven@example.com", &issued.token, "N3w!password", None)
        .await
        .expect_err("expired token");
    assert!(matches!(err, AuthError::InvalidToken));

    // Nothing above consumed the slot, so a fresh token still works.
    let issued = manager
        .start_password_reset("sven@example.com")
        .await
        .expect("second reset token");
    manager
        .reset_password("sven@example.com", &issued.token, "N3w!password", None)
        .await
        .expect("reset with the fresh token");
}

#[tokio::test]
async fn issuing_a_reset_token_overwrites_the_previous_one() {
    let (manager, _store) = memory_manager().expect("manager");

    manager
        .register(new_account("tara", "tara@example.com"), None)
        .await
        .expect("registration");

    let first = manager
        .start_password_reset("tara@example.com")
        .await
        .expect("first token");
    let second = manager
        .start_password_reset("tara@example.com")
        .await
        .expect("second token");
    assert_ne!(first.token, second.token);

    let err = manager
        .reset_password("tara@example.com", &first.token, "N3w!password", None)
        .await
        .expect_err("overwritten token");
    assert!(matches!(err, AuthError::InvalidToken));

    manager
        .reset_password("tara@example.com", &second.token, "N3w!password", None)
        .await
        .expect("current token");
}

#[tokio::test]
async fn change_password_requires_the_current_one() {
    let (manager, _store) = memory_manager().expect("manager");

    let session = manager
        .register(new_account("uma", "uma@example.com"), None)
        .await
        .expect("registration");
    let account_id = session.account.id;

    let err = manager
        .change_password(account_id, WRONG_PASSWORD, "N3w!password")
        .await
        .expect_err("wrong current password");
    assert!(matches!(err, AuthError::InvalidCredentials));

    let err = manager
        .change_password(account_id, PASSWORD, "weak")
        .await
        .expect_err("weak replacement");
    assert!(matches!(err, AuthError::InvalidInput(_)));

    let err = manager
        .change_password(uuid::Uuid::new_v4(), PASSWORD, "N3w!password")
        .await
        .expect_err("unknown account");
    assert!(matches!(err, AuthError::NotFound));

    manager
        .change_password(account_id, PASSWORD, "N3w!password")
        .await
        .expect("change");
    manager
        .login("uma", "N3w!password", None)
        .await
        .expect("login with the new password");
}

#[tokio::test]
async fn access_tokens_from_a_foreign_issuer_are_rejected() {
    let (manager, _store) = memory_manager().expect("manager");
    let (foreign, _foreign_store) = {
        let mut config = gatehouse::test_support::test_config();
        config.jwt_secret = "a-completely-different-secret-value".to_string();
        gatehouse::test_support::memory_manager_with(config).expect("foreign manager")
    };

    let session = foreign
        .register(new_account("vera", "vera@example.com"), None)
        .await
        .expect("registration");

    let err = manager
        .validate_access_token(&session.access_token)
        .expect_err("foreign signature");
    assert!(matches!(err, AuthError::InvalidToken));

    let err = manager
        .validate_access_token("not-even-a-jwt")
        .expect_err("malformed token");
    assert!(matches!(err, AuthError::InvalidToken));
}

#[tokio::test]
async fn full_lifecycle_scenario() {
    let (manager, store) = memory_manager().expect("manager");
    let fixtures = TestFixtures::new(&store);

    let session = manager
        .register(new_account("wren", "wren@example.com"), Some("10.1.1.1"))
        .await
        .expect("registration");

    let err = manager
        .register(new_account("wren", "other@example.com"), None)
        .await
        .expect_err("duplicate username");
    assert!(matches!(err, AuthError::Conflict("username")));

    for _ in 0..5 {
        let err = manager.login("wren", WRONG_PASSWORD, None).await.expect_err("failure");
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
    let err = manager.login("wren", PASSWORD, None).await.expect_err("locked");
    assert!(matches!(err, AuthError::AccountLocked));

    // Lockout gates new logins; the session issued before it still rotates.
    let renewed = manager
        .refresh(&session.refresh_token, None)
        .await
        .expect("rotation while locked");
    let err = manager
        .refresh(&session.refresh_token, None)
        .await
        .expect_err("stale replay");
    assert!(matches!(err, AuthError::TokenRevoked));

    fixtures.expire_lockout(session.account.id);
    let restored = manager
        .login("wren", PASSWORD, None)
        .await
        .expect("login after the lock lapses");
    assert_eq!(fixtures.failed_logins(restored.account.id), Some(0));

    manager
        .validate_access_token(&renewed.access_token)
        .expect("access token from the rotation");
}
