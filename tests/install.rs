// tests/install.rs

//! End-to-end install, upgrade, conflict and removal scenarios.

mod common;

use common::{NeverPrompt, PackageSpec, TestEnv};
use debpkg::db::models::{Eflag, PkgStatus, Want};
use debpkg::{archive, sched};
use std::fs;

#[test]
fn fresh_install_reaches_installed() {
    // An archive with no dependencies unpacks and configures cleanly
    let env = TestEnv::new();
    let pkg = env.build(
        &PackageSpec::new("foo", "1.0")
            .file("/usr/bin/foo", "#!/bin/sh\necho foo\n", 0o755)
            .file("/usr/share/doc/foo/README", "docs\n", 0o644),
    );

    let mut session = env.session();
    let id = archive::unpack(&mut session, &pkg).unwrap();
    assert_eq!(session.db.pkg(id).status, PkgStatus::Unpacked);
    assert!(env.disk("/usr/bin/foo").exists());

    let failures = sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();
    assert_eq!(failures, 0);

    let pkg_rec = session.db.pkg(id);
    assert_eq!(pkg_rec.status, PkgStatus::Installed);
    assert_eq!(pkg_rec.want, Want::Install);
    assert_eq!(pkg_rec.eflag, Eflag::Ok);
    assert_eq!(
        pkg_rec.installed.version.as_ref().unwrap().to_string(),
        "1.0"
    );
    // Five parent directories plus the two shipped files
    assert_eq!(pkg_rec.files.len(), 7);

    session.commit().unwrap();

    // The status file round-trips through a fresh session
    drop(session);
    let session = env.session();
    let id = session.db.find("foo").unwrap();
    assert_eq!(session.db.pkg(id).status, PkgStatus::Installed);
}

#[test]
fn install_writes_info_files() {
    let env = TestEnv::new();
    let pkg = env.build(
        &PackageSpec::new("foo", "1.0")
            .file("/usr/bin/foo", "content", 0o755)
            .script("postinst", "#!/bin/sh\nexit 0\n"),
    );

    let mut session = env.session();
    archive::unpack(&mut session, &pkg).unwrap();

    let info = env.admin.path().join("info");
    let list = fs::read_to_string(info.join("foo.list")).unwrap();
    assert!(list.contains("/usr/bin/foo"));

    let md5sums = fs::read_to_string(info.join("foo.md5sums")).unwrap();
    assert!(md5sums.contains("usr/bin/foo"));
    // 32 hex chars, two spaces, path
    let line = md5sums.lines().find(|l| l.ends_with("usr/bin/foo")).unwrap();
    assert_eq!(line.split("  ").next().unwrap().len(), 32);

    assert!(info.join("foo.postinst").exists());
}

#[test]
fn file_ownership_is_unique_after_install() {
    let env = TestEnv::new();
    let a = env.build(&PackageSpec::new("a", "1.0").file("/usr/bin/a", "a", 0o755));
    let b = env.build(&PackageSpec::new("b", "1.0").file("/usr/bin/b", "b", 0o755));

    let mut session = env.session();
    let ida = archive::unpack(&mut session, &a).unwrap();
    let idb = archive::unpack(&mut session, &b).unwrap();
    sched::configure_queue(&mut session, vec![ida, idb], &mut NeverPrompt).unwrap();

    for node in session.fsys.iter_ids() {
        let owners = session.fsys.owners(node);
        let name = &session.fsys.node(node).name;
        if name == "/usr/bin/a" || name == "/usr/bin/b" {
            assert_eq!(owners.len(), 1, "path {} has owners {:?}", name, owners);
        }
    }
}

#[test]
fn conflicting_file_refused_before_staging() {
    // S4: b ships a path owned by installed a, without Replaces
    let env = TestEnv::new();
    let a = env.build(&PackageSpec::new("a", "1.0").file("/usr/bin/x", "from a", 0o755));
    let b = env.build(&PackageSpec::new("b", "1.0").file("/usr/bin/x", "from b", 0o755));

    let mut session = env.session();
    let ida = archive::unpack(&mut session, &a).unwrap();
    sched::configure_queue(&mut session, vec![ida], &mut NeverPrompt).unwrap();

    let err = archive::unpack(&mut session, &b).unwrap_err();
    assert!(err.to_string().contains("trying to overwrite"));

    // Nothing was staged, a's file is untouched
    assert!(!env.disk("/usr/bin/x.dpkg-new").exists());
    assert_eq!(fs::read_to_string(env.disk("/usr/bin/x")).unwrap(), "from a");
    let ida = session.db.find("a").unwrap();
    assert_eq!(session.db.pkg(ida).status, PkgStatus::Installed);
    assert_eq!(
        session.db.pkg(ida).installed.version.as_ref().unwrap().to_string(),
        "1.0"
    );
}

#[test]
fn replaces_takes_over_file() {
    let env = TestEnv::new();
    let a = env.build(&PackageSpec::new("a", "1.0").file("/usr/bin/x", "from a", 0o755));
    let b = env.build(
        &PackageSpec::new("b", "1.0")
            .control("Replaces", "a")
            .file("/usr/bin/x", "from b", 0o755),
    );

    let mut session = env.session();
    let ida = archive::unpack(&mut session, &a).unwrap();
    sched::configure_queue(&mut session, vec![ida], &mut NeverPrompt).unwrap();

    let idb = archive::unpack(&mut session, &b).unwrap();
    assert_eq!(fs::read_to_string(env.disk("/usr/bin/x")).unwrap(), "from b");

    // Ownership moved to b; a's list no longer mentions the path
    let node = session.fsys.find("/usr/bin/x").unwrap();
    assert_eq!(session.fsys.owners(node), &[idb]);
    let a_list = fs::read_to_string(env.admin.path().join("info/a.list")).unwrap();
    assert!(!a_list.contains("/usr/bin/x"));
}

#[test]
fn upgrade_replaces_files_and_removes_vanished() {
    let env = TestEnv::new();
    let v1 = env.build(
        &PackageSpec::new("foo", "1.0")
            .file("/usr/bin/foo", "one", 0o755)
            .file("/usr/share/foo/old-helper", "gone soon", 0o644),
    );
    let v2 = env.build(&PackageSpec::new("foo", "1.1").file("/usr/bin/foo", "two", 0o755));

    let mut session = env.session();
    let id = archive::unpack(&mut session, &v1).unwrap();
    sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();
    assert!(env.disk("/usr/share/foo/old-helper").exists());

    let id = archive::unpack(&mut session, &v2).unwrap();
    sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();

    assert_eq!(fs::read_to_string(env.disk("/usr/bin/foo")).unwrap(), "two");
    assert!(!env.disk("/usr/share/foo/old-helper").exists());
    assert_eq!(
        session.db.pkg(id).installed.version.as_ref().unwrap().to_string(),
        "1.1"
    );
    assert_eq!(session.db.pkg(id).status, PkgStatus::Installed);
}

#[test]
fn maintainer_scripts_run_in_order() {
    let env = TestEnv::new();
    let marker = env.root.path().join("order.log");
    let log_script = |phase: &str| {
        format!(
            "#!/bin/sh\necho \"{} $1 $2\" >> {}\nexit 0\n",
            phase,
            marker.display()
        )
    };

    let pkg = env.build(
        &PackageSpec::new("foo", "1.0")
            .file("/usr/bin/foo", "x", 0o755)
            .script("preinst", &log_script("preinst"))
            .script("postinst", &log_script("postinst")),
    );

    let mut session = env.session();
    let id = archive::unpack(&mut session, &pkg).unwrap();
    sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();

    let text = fs::read_to_string(&marker).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "preinst install ");
    assert_eq!(lines[1], "postinst configure ");
}

#[test]
fn failing_postinst_leaves_half_configured_reinstreq() {
    let env = TestEnv::new();
    let pkg = env.build(
        &PackageSpec::new("bad", "1.0")
            .file("/usr/bin/bad", "x", 0o755)
            .script("postinst", "#!/bin/sh\nexit 1\n"),
    );

    let mut session = env.session();
    let id = archive::unpack(&mut session, &pkg).unwrap();
    let failures = sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();
    assert_eq!(failures, 1);
    assert_eq!(session.db.pkg(id).status, PkgStatus::HalfConfigured);
    assert_eq!(session.db.pkg(id).eflag, Eflag::Reinstreq);
}

#[test]
fn remove_keeps_conffiles_purge_erases() {
    let env = TestEnv::new();
    let pkg = env.build(
        &PackageSpec::new("foo", "1.0")
            .file("/usr/bin/foo", "bin", 0o755)
            .conffile("/etc/foo.conf", "conf"),
    );

    let mut session = env.session();
    let id = archive::unpack(&mut session, &pkg).unwrap();
    sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();
    assert!(env.disk("/etc/foo.conf").exists());

    sched::remove_package(&mut session, id, false).unwrap();
    assert_eq!(session.db.pkg(id).status, PkgStatus::ConfigFiles);
    assert!(!env.disk("/usr/bin/foo").exists());
    assert!(env.disk("/etc/foo.conf").exists());
    assert!(!session.db.pkg(id).installed.conffiles.is_empty());

    sched::remove_package(&mut session, id, true).unwrap();
    assert_eq!(session.db.pkg(id).status, PkgStatus::NotInstalled);
    assert!(!env.disk("/etc/foo.conf").exists());

    // After commit the record disappears from the status file
    session.commit().unwrap();
    let status = fs::read_to_string(env.admin.path().join("status")).unwrap();
    assert!(!status.contains("Package: foo"));
}

#[test]
fn removal_blocked_by_reverse_depends() {
    let env = TestEnv::new();
    let lib = env.build(&PackageSpec::new("lib", "1.0").file("/usr/lib/lib.so", "so", 0o644));
    let app = env.build(
        &PackageSpec::new("app", "1.0")
            .control("Depends", "lib")
            .file("/usr/bin/app", "app", 0o755),
    );

    let mut session = env.session();
    let idlib = archive::unpack(&mut session, &lib).unwrap();
    let idapp = archive::unpack(&mut session, &app).unwrap();
    sched::configure_queue(&mut session, vec![idlib, idapp], &mut NeverPrompt).unwrap();

    let err = sched::remove_package(&mut session, idlib, false).unwrap_err();
    assert!(err.to_string().contains("dependency problems"));
    assert_eq!(session.db.pkg(idlib).status, PkgStatus::Installed);
}

#[test]
fn essential_package_refuses_removal() {
    let env = TestEnv::new();
    let pkg = env.build(
        &PackageSpec::new("base", "1.0")
            .control("Essential", "yes")
            .file("/usr/bin/base", "x", 0o755),
    );

    let mut session = env.session();
    let id = archive::unpack(&mut session, &pkg).unwrap();
    sched::configure_queue(&mut session, vec![id], &mut NeverPrompt).unwrap();

    let err = sched::remove_package(&mut session, id, false).unwrap_err();
    assert!(err.to_string().contains("essential"));

    // The force flag overrides
    session.force.remove_essential = true;
    sched::remove_package(&mut session, id, false).unwrap();
    assert_eq!(session.db.pkg(id).status, PkgStatus::ConfigFiles);
}

#[test]
fn missing_predependency_aborts_before_disk_changes() {
    let env = TestEnv::new();
    let pkg = env.build(
        &PackageSpec::new("needy", "1.0")
            .control("Pre-Depends", "absent (>= 2.0)")
            .file("/usr/bin/needy", "x", 0o755),
    );

    let mut session = env.session();
    let err = archive::unpack(&mut session, &pkg).unwrap_err();
    assert!(err.to_string().contains("pre-dependency"));
    assert!(!env.disk("/usr/bin/needy").exists());
    assert!(!env.disk("/usr/bin/needy.dpkg-new").exists());
}
