use chrono::Utc;
use rand::{seq::SliceRandom, Rng};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    random_id, Gender, GroupConstraint, PairConstraint, Roster, Student, StudentId, TeamMode,
};

impl Roster {
    pub fn student(&self, id: &StudentId) -> Option<&Student> {
        self.students.iter().find(|student| &student.id == id)
    }

    pub fn add_student(&mut self, name: &str, gender: Gender) -> Option<&Student> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        self.students.push(Student {
            id: StudentId::random(),
            name: name.into(),
            gender,
        });
        self.touch();
        self.students.last()
    }

    /// Removes a student together with every constraint that mentions them.
    pub fn remove_student(&mut self, id: &StudentId) -> Option<Student> {
        let index = self.students.iter().position(|student| &student.id == id)?;
        let student = self.students.remove(index);

        self.pair_conditions
            .retain(|pair| !pair.student_ids.contains(id));
        self.group_conditions
            .retain(|group| !group.student_ids.contains(id));

        self.touch();
        Some(student)
    }

    pub fn add_pair(&mut self, ids: &[StudentId]) -> Option<&PairConstraint> {
        match self.known_distinct(ids, 2)?.as_slice() {
            [a, b] => {
                self.pair_conditions.push(PairConstraint {
                    id: random_id(),
                    student_ids: [a.clone(), b.clone()],
                });
            }
            _ => return None,
        }
        self.touch();
        self.pair_conditions.last()
    }

    pub fn add_group(&mut self, ids: &[StudentId]) -> Option<&GroupConstraint> {
        match self.known_distinct(ids, 4)?.as_slice() {
            [a, b, c, d] => {
                self.group_conditions.push(GroupConstraint {
                    id: random_id(),
                    student_ids: [a.clone(), b.clone(), c.clone(), d.clone()],
                });
            }
            _ => return None,
        }
        self.touch();
        self.group_conditions.last()
    }

    pub fn remove_condition(&mut self, id: &str) -> bool {
        let before = self.pair_conditions.len() + self.group_conditions.len();
        self.pair_conditions.retain(|pair| pair.id != id);
        self.group_conditions.retain(|group| group.id != id);

        let removed = self.pair_conditions.len() + self.group_conditions.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    fn known_distinct(&self, ids: &[StudentId], count: usize) -> Option<Vec<StudentId>> {
        let unique = ids.iter().collect::<BTreeSet<_>>();
        if ids.len() != count || unique.len() != count {
            return None;
        }
        if !ids.iter().all(|id| self.student(id).is_some()) {
            return None;
        }
        Some(ids.to_vec())
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Splits the present students of `roster` into `mode.team_count()` teams.
///
/// Separation constraints for the mode are placed first, in registration
/// order; a student already placed by an earlier constraint stays where they
/// are. Everyone else is shuffled and dealt into the smallest team. Each team
/// comes back sorted by name.
pub fn assign_teams<R: Rng>(
    roster: &Roster,
    absentees: &BTreeSet<StudentId>,
    mode: TeamMode,
    rng: &mut R,
) -> Vec<Vec<Student>> {
    let team_count = mode.team_count();
    let mut teams: Vec<Vec<Student>> = vec![Vec::new(); team_count];

    let present = roster
        .students
        .iter()
        .filter(|student| !absentees.contains(&student.id))
        .collect::<Vec<_>>();
    let by_id = present
        .iter()
        .map(|&student| (&student.id, student))
        .collect::<BTreeMap<_, _>>();
    let mut assigned = BTreeSet::new();

    let constraints: Vec<&[StudentId]> = match mode {
        TeamMode::FourTeams => roster
            .group_conditions
            .iter()
            .map(|group| &group.student_ids[..])
            .collect(),
        TeamMode::TwoTeams => roster
            .pair_conditions
            .iter()
            .map(|pair| &pair.student_ids[..])
            .collect(),
    };

    for ids in constraints {
        let members = ids
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect::<Vec<_>>();
        place_apart(&mut teams, &members, &mut assigned, rng);
    }

    let mut remaining = present
        .into_iter()
        .filter(|student| !assigned.contains(&student.id))
        .collect::<Vec<_>>();
    remaining.shuffle(rng);

    for student in remaining {
        let smallest = (0..team_count)
            .min_by_key(|&team| teams[team].len())
            .unwrap_or(0);
        teams[smallest].push(student.clone());
    }

    for team in &mut teams {
        sort_by_name(team);
    }

    teams
}

/// Deals the unplaced `members` into distinct teams, smallest first.
///
/// Ties between equally small teams are broken at random, and teams already
/// holding a placed member rank after the others. Filling the smallest teams
/// keeps every team within one of the others.
fn place_apart<R: Rng>(
    teams: &mut [Vec<Student>],
    members: &[&Student],
    assigned: &mut BTreeSet<StudentId>,
    rng: &mut R,
) {
    let holds_member = |team: &Vec<Student>| {
        team.iter()
            .any(|student| members.iter().any(|member| member.id == student.id))
    };

    let mut order = (0..teams.len()).collect::<Vec<_>>();
    order.shuffle(rng);
    order.sort_by_key(|&team| (teams[team].len(), holds_member(&teams[team])));

    let unplaced = members
        .iter()
        .filter(|member| !assigned.contains(&member.id))
        .collect::<Vec<_>>();

    for (&student, team) in unplaced.into_iter().zip(order) {
        assigned.insert(student.id.clone());
        teams[team].push(student.clone());
    }
}

pub fn sort_by_name(team: &mut [Student]) {
    team.sort_by(|a, b| a.name.cmp(&b.name));
}
