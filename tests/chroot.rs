// tests/chroot.rs

//! Chroot session ordering and idempotence with the fake host.

mod common;

use common::{TestEnv, days_ago, names};
use legendary::host::Invocation;
use legendary::{ChrootSession, Error, standard_bindings};

#[test]
fn test_unmounts_reverse_mounts() {
    let env = TestEnv::new();
    let snapshot = env.host.seed(&env.store(), &days_ago(0));
    let bindings = standard_bindings(&env.config.resolv_conf);

    let mut session = ChrootSession::new(&snapshot, bindings, &*env.host, &*env.host);
    session.prepare().unwrap();
    assert_eq!(env.host.mounted().len(), 5);
    session.cleanup().unwrap();

    let mut unmounts = env.host.unmounts();
    unmounts.reverse();
    assert_eq!(env.host.binds(), unmounts);
    assert!(env.host.mounted().is_empty());
}

#[test]
fn test_cleanup_twice_is_quiet() {
    let env = TestEnv::new();
    let snapshot = env.host.seed(&env.store(), &days_ago(0));
    let bindings = standard_bindings(&env.config.resolv_conf);

    let mut session = ChrootSession::new(&snapshot, bindings, &*env.host, &*env.host);
    session.prepare().unwrap();
    session.cleanup().unwrap();
    env.host.clear_calls();

    session.cleanup().unwrap();
    assert!(env.host.calls().is_empty());
}

#[test]
fn test_cleanup_reports_busy_mount_but_releases_the_rest() {
    let env = TestEnv::new();
    let snapshot = env.host.seed(&env.store(), &days_ago(0));
    let bindings = standard_bindings(&env.config.resolv_conf);
    env.host.fail(|f| f.unmount = Some("sys".to_string()));

    let mut session = ChrootSession::new(&snapshot, bindings, &*env.host, &*env.host);
    session.prepare().unwrap();
    let err = session.cleanup().unwrap_err();

    assert!(matches!(err, Error::MountFault(_)));
    assert_eq!(env.host.mounted(), vec![snapshot.subvolume_path.join("sys")]);
    assert_eq!(session.mounted(), &[snapshot.subvolume_path.join("sys")]);

    env.host.fail(|f| f.unmount = None);
    session.cleanup().unwrap();
    assert!(env.host.mounted().is_empty());
}

#[test]
fn test_run_passes_argument_vector() {
    let env = TestEnv::new();
    let snapshot = env.host.seed(&env.store(), &days_ago(0));
    let bindings = standard_bindings(&env.config.resolv_conf);
    let session = ChrootSession::new(&snapshot, bindings, &*env.host, &*env.host);

    let hostile = "vim; rm -rf /";
    let output = session
        .run(&Invocation::new("/usr/lib/LegendaryOS/pacman").args(["-S", "--noconfirm", hostile]))
        .unwrap();
    assert!(output.success());

    let calls = env.host.calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        common::Call::Run(root, args) if *root == snapshot.subvolume_path
            && *args == names(&["-S", "--noconfirm", hostile])
    )));
}
