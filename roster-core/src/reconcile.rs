//! Join planning allocations to time-tracking people and projects.
//!
//! The two systems share no key. People and projects are indexed by their
//! time-tracking ids; each allocation reaches those indexes through the period's
//! cross reference (planning id -> tracking id). Allocations that fall through
//! either lookup are dropped with a [`Diagnostic`], never guessed.

use std::collections::HashMap;

use tracing::warn;

use crate::diagnostic::Diagnostic;
use crate::model::{Allocation, IdentityLink, LinkKind, Person, Project, ResolvedAssignment};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub assignments: Vec<ResolvedAssignment>,
    pub diagnostics: Vec<Diagnostic>,
}

/// `people` and `projects` are the time-tracking system's records.
pub fn reconcile(
    allocations: &[Allocation],
    links: &[IdentityLink],
    people: &[Person],
    projects: &[Project],
) -> Reconciliation {
    let people_by_id: HashMap<u64, &Person> = people.iter().map(|p| (p.id, p)).collect();
    let projects_by_id: HashMap<u64, &Project> = projects
        .iter()
        .filter_map(|p| p.tracking_id.map(|id| (id, p)))
        .collect();
    let link_for = |kind: LinkKind, planning_id: u64| {
        links
            .iter()
            .find(|l| l.kind == kind && l.planning_id == planning_id)
    };

    let mut out = Reconciliation::default();
    for allocation in allocations {
        let project_link = link_for(LinkKind::Project, allocation.planning_project_id);
        let tracking_project_id = project_link.and_then(|l| l.tracking_id);
        let Some((project_id, project)) = tracking_project_id
            .and_then(|id| projects_by_id.get(&id).map(|p| (id, *p)))
        else {
            warn!(
                planning_project_id = allocation.planning_project_id,
                tracking_project_id = ?tracking_project_id,
                "project-id-not-found, allocation dropped"
            );
            out.diagnostics.push(Diagnostic::ProjectNotFound {
                planning_project_id: allocation.planning_project_id,
                tracking_project_id,
            });
            continue;
        };

        let person_link = link_for(LinkKind::Person, allocation.planning_person_id);
        let tracking_person_id = person_link.and_then(|l| l.tracking_id);
        let Some(person) = tracking_person_id.and_then(|id| people_by_id.get(&id)) else {
            warn!(
                planning_person_id = allocation.planning_person_id,
                tracking_person_id = ?tracking_person_id,
                "person-id-not-found, allocation dropped"
            );
            out.diagnostics.push(Diagnostic::PersonNotFound {
                planning_person_id: allocation.planning_person_id,
                tracking_person_id,
            });
            continue;
        };

        // Planning role tags are authoritative; tracking roles are the fallback.
        let role_tag = person_link
            .and_then(|l| l.role_tags.first())
            .or_else(|| person.role_tags.first())
            .cloned()
            .unwrap_or_default();

        out.assignments.push(ResolvedAssignment {
            planning_project_id: allocation.planning_project_id,
            tracking_project_id: project_id,
            project_name: project.name.clone(),
            tracking_person_id: person.id,
            hours: allocation.hours,
            person_name: person.full_name(),
            first_name: person.first_name.clone(),
            role_tag,
        });
    }
    out
}
