use myshoes_core::Target;
use myshoes_store::{Store, StoreResult};

/// The live target serving `owner/repo` on `host_domain`.
///
/// A repository target wins over its organization's target. Deleted
/// targets never match.
pub fn resolve_target(
    store: &Store,
    host_domain: Option<&str>,
    full_name: &str,
) -> StoreResult<Option<Target>> {
    let owner = full_name.split('/').next().unwrap_or(full_name);
    for scope in [full_name, owner] {
        match store.get_target_by_natural_key(host_domain, scope) {
            Ok(target) if !target.is_deleted() => return Ok(Some(target)),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::target;

    #[test]
    fn repository_target_wins_over_organization() {
        let store = Store::open_in_memory().unwrap();
        let org = store.create_target(&target("octocat")).unwrap();
        let repo = store.create_target(&target("octocat/hello-world")).unwrap();

        let found = resolve_target(&store, None, "octocat/hello-world").unwrap().unwrap();
        assert_eq!(found.id, repo.id);
        let found = resolve_target(&store, None, "octocat/other").unwrap().unwrap();
        assert_eq!(found.id, org.id);
    }

    #[test]
    fn deleted_and_foreign_host_targets_do_not_match() {
        let store = Store::open_in_memory().unwrap();
        let t = store.create_target(&target("octocat/hello-world")).unwrap();
        store.delete_target(&t.id).unwrap();

        assert!(resolve_target(&store, None, "octocat/hello-world").unwrap().is_none());

        store.create_target(&target("acme")).unwrap();
        assert!(
            resolve_target(&store, Some("https://ghe.acme.dev"), "acme/app")
                .unwrap()
                .is_none()
        );
    }
}
